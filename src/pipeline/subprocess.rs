//! Rendering through poppler's `pdftoppm` executable.
//!
//! Useful where pdfium is not installed, and as a second opinion when pdfium
//! misrenders a document. Each page is a separate child process writing one
//! PNG into a private scratch directory; the child is killed as soon as the
//! session is cancelled, so a stuck page never outlives its job. The child's
//! stderr goes to a file beside the PNG, never a pipe, so a damaged document
//! that makes poppler print thousands of warnings cannot stall it.

use crate::error::PipelineError;
use crate::pipeline::document;
use crate::pipeline::render::{CancelFlag, PageRenderer, RenderBackend, RenderTarget, Session};
use image::DynamicImage;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_PROGRAM: &str = "pdftoppm";
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Lines of child stderr kept in an error message.
const STDERR_TAIL_LINES: usize = 5;

/// Renders each page with an external `pdftoppm` process.
#[derive(Debug, Clone)]
pub struct PdftoppmBackend {
    program: PathBuf,
}

impl Default for PdftoppmBackend {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }
}

impl PdftoppmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `pdftoppm` executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl RenderBackend for PdftoppmBackend {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    fn with_document(&self, pdf: &[u8], session: &mut Session<'_>) -> Result<(), PipelineError> {
        // pdftoppm reads the page tree itself; sizes come from our own parser
        // so the target for each page is known before the child starts.
        let sizes = document::page_sizes(pdf)?;

        let scratch = tempfile::Builder::new()
            .prefix("pdfseal-raster-")
            .tempdir()
            .map_err(|e| PipelineError::staging(std::env::temp_dir(), e))?;
        let input = scratch.path().join("input.pdf");
        std::fs::write(&input, pdf).map_err(|e| PipelineError::staging(&input, e))?;

        let result = {
            let mut renderer = PdftoppmRenderer {
                program: &self.program,
                input: &input,
                dir: scratch.path(),
                sizes,
            };
            session(&mut renderer)
        };

        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!("Failed to remove raster scratch dir {}: {}", path.display(), e);
        }
        result
    }
}

struct PdftoppmRenderer<'a> {
    program: &'a Path,
    input: &'a Path,
    dir: &'a Path,
    sizes: Vec<(f32, f32)>,
}

impl PdftoppmRenderer<'_> {
    fn spawn(&self, page: usize, target: RenderTarget, prefix: &Path) -> Result<Child, PipelineError> {
        let log = prefix.with_extension("err");
        let stderr = File::create(&log).map_err(|e| PipelineError::staging(&log, e))?;
        Command::new(self.program)
            .arg("-png")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-singlefile")
            .arg("-scale-to-x")
            .arg(target.width.to_string())
            .arg("-scale-to-y")
            .arg(target.height.to_string())
            .arg(self.input)
            .arg(prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| self.process_failed(e))
    }

    fn process_failed(&self, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::ProcessFailed {
            program: self.program.display().to_string(),
            detail: err.to_string(),
        }
    }
}

impl PageRenderer for PdftoppmRenderer<'_> {
    fn page_count(&self) -> usize {
        self.sizes.len()
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32), PipelineError> {
        self.sizes
            .get(index)
            .copied()
            .ok_or_else(|| PipelineError::RasterisationFailed {
                page: index + 1,
                detail: format!("document has only {} pages", self.sizes.len()),
            })
    }

    fn render_page(
        &mut self,
        index: usize,
        target: RenderTarget,
        cancel: &CancelFlag,
    ) -> Result<DynamicImage, PipelineError> {
        let page = index + 1;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { page });
        }

        let prefix = self.dir.join(format!("page-{page:06}"));
        let mut child = ChildGuard(Some(self.spawn(page, target, &prefix)?));

        let status = loop {
            match child.inner()?.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if cancel.is_cancelled() => {
                    debug!("Killing pdftoppm for cancelled page {}", page);
                    child.kill();
                    return Err(PipelineError::Cancelled { page });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    child.kill();
                    return Err(self.process_failed(e));
                }
            }
        };

        // Reaped by try_wait; nothing left for the guard to kill.
        child.take();

        let log = prefix.with_extension("err");
        let stderr = std::fs::read(&log)
            .map(|raw| stderr_tail(&String::from_utf8_lossy(&raw)))
            .unwrap_or_default();
        if let Err(e) = std::fs::remove_file(&log) {
            debug!("Could not remove {}: {}", log.display(), e);
        }
        if !status.success() {
            return Err(PipelineError::RasterisationFailed {
                page,
                detail: format!("pdftoppm exited with {}: {}", status, stderr),
            });
        }

        let png = prefix.with_extension("png");
        let image = image::open(&png).map_err(|e| PipelineError::RasterisationFailed {
            page,
            detail: format!("unreadable pdftoppm output {}: {}", png.display(), e),
        })?;
        if let Err(e) = std::fs::remove_file(&png) {
            debug!("Could not remove {}: {}", png.display(), e);
        }
        Ok(target.fit(image))
    }
}

/// Last few non-empty lines of a child's stderr.
fn stderr_tail(text: &str) -> String {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .rev()
        .take(STDERR_TAIL_LINES)
        .collect();
    lines.reverse();
    lines.join("; ")
}

/// Kills and reaps the child if it is still held when dropped.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn inner(&mut self) -> Result<&mut Child, PipelineError> {
        self.0
            .as_mut()
            .ok_or_else(|| PipelineError::TaskFailed("child process already reaped".into()))
    }

    fn take(&mut self) -> Option<Child> {
        self.0.take()
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdf, TestPage};

    #[test]
    fn missing_program_is_a_process_failure() {
        let backend = PdftoppmBackend::with_program("/nonexistent/pdftoppm");
        let pdf = build_pdf(&[TestPage::text(612.0, 792.0, "x")]);
        let mut session = |r: &mut dyn PageRenderer| -> Result<(), PipelineError> {
            assert_eq!(r.page_count(), 1);
            assert_eq!(r.page_size(0)?, (612.0, 792.0));
            let target = RenderTarget::for_page((612.0, 792.0), 1.0, 1000);
            r.render_page(0, target, &CancelFlag::new()).map(|_| ())
        };
        let err = backend.with_document(&pdf, &mut session).unwrap_err();
        assert!(matches!(err, PipelineError::ProcessFailed { .. }), "got {err:?}");
    }

    #[test]
    fn cancelled_session_never_spawns() {
        let backend = PdftoppmBackend::with_program("/nonexistent/pdftoppm");
        let pdf = build_pdf(&[TestPage::text(100.0, 100.0, "x")]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut session = |r: &mut dyn PageRenderer| -> Result<(), PipelineError> {
            let target = RenderTarget::for_page((100.0, 100.0), 1.0, 1000);
            r.render_page(0, target, &cancel).map(|_| ())
        };
        let err = backend.with_document(&pdf, &mut session).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { page: 1 }));
    }

    #[test]
    fn rejects_garbage_before_spawning() {
        let backend = PdftoppmBackend::default();
        let mut session = |_: &mut dyn PageRenderer| -> Result<(), PipelineError> { Ok(()) };
        let err = backend.with_document(b"not a pdf", &mut session).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn out_of_range_page_size_is_an_error() {
        let backend = PdftoppmBackend::default();
        let pdf = build_pdf(&[TestPage::text(100.0, 100.0, "x")]);
        let mut session =
            |r: &mut dyn PageRenderer| -> Result<(), PipelineError> { r.page_size(3).map(|_| ()) };
        let err = backend.with_document(&pdf, &mut session).unwrap_err();
        assert!(matches!(err, PipelineError::RasterisationFailed { page: 4, .. }));
    }

    #[test]
    fn stderr_tail_keeps_the_last_lines() {
        let text = "a\n\nb\nc\nd\ne\nf\n";
        assert_eq!(stderr_tail(text), "b; c; d; e; f");
        assert_eq!(stderr_tail(""), "");
    }

    #[cfg(unix)]
    #[test]
    fn noisy_failing_child_reports_its_error() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        // Far more stderr than a pipe buffer holds, then a failure.
        let bin = tempfile::tempdir().unwrap();
        let program = bin.path().join("fake-pdftoppm");
        std::fs::write(
            &program,
            "#!/bin/sh\n\
             head -c 204800 /dev/zero | tr '\\0' 'x' >&2\n\
             echo >&2\n\
             echo 'Syntax Error: Couldn'\\''t read xref table' >&2\n\
             exit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = PdftoppmBackend::with_program(&program);
        let pdf = build_pdf(&[TestPage::text(100.0, 100.0, "x")]);
        let cancel = CancelFlag::new();
        // Backstop so a regression fails instead of hanging.
        let backstop = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(20));
            backstop.cancel();
        });

        let started = Instant::now();
        let mut session = |r: &mut dyn PageRenderer| -> Result<(), PipelineError> {
            let target = RenderTarget::for_page((100.0, 100.0), 1.0, 1000);
            r.render_page(0, target, &cancel).map(|_| ())
        };
        let err = backend.with_document(&pdf, &mut session).unwrap_err();

        match err {
            PipelineError::RasterisationFailed { page: 1, detail } => {
                assert!(detail.contains("Syntax Error"), "detail: {detail}");
            }
            other => panic!("expected a rasterisation failure, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(15));
    }
}
