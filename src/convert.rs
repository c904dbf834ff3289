//! Job-level entry points: watermark then flatten, inside a private staging
//! namespace.
//!
//! Each call creates a [`PipelineJob`], runs the stages strictly in order,
//! and releases the namespace before returning, whatever the outcome. The
//! first failing stage aborts the rest; there is no partial output.

use crate::config::{PipelineConfig, WatermarkSpec};
use crate::error::PipelineError;
use crate::job::{Artifact, PipelineJob};
use crate::output::{DocumentInfo, JobOutput, JobStats};
use crate::pipeline::{document, flatten, input, watermark};
use crate::progress::Stage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

enum Source<'a> {
    Location(&'a str),
    Bytes(Vec<u8>),
}

/// Watermark and flatten the PDF at `source` (local path or HTTP(S) URL).
///
/// # Errors
///
/// Any stage failure, classified by [`PipelineError::kind`]. The job's
/// staging namespace has been removed by the time this returns.
///
/// # Example
///
/// ```rust,no_run
/// use pdfseal::{seal, PipelineConfig, WatermarkSpec};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spec = WatermarkSpec::new("Shared with: alice@example.com");
/// let output = seal("contract.pdf", &spec, &PipelineConfig::default()).await?;
/// std::fs::write("contract.sealed.pdf", &output.pdf)?;
/// # Ok(())
/// # }
/// ```
pub async fn seal(
    source: impl AsRef<str>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput, PipelineError> {
    run_job(Source::Location(source.as_ref()), spec, config).await
}

/// Like [`seal`], for a document already in memory.
pub async fn seal_bytes(
    bytes: Vec<u8>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput, PipelineError> {
    run_job(Source::Bytes(bytes), spec, config).await
}

/// Like [`seal`], writing the result to `output_path`.
///
/// The file is written under a temporary name and renamed into place, so a
/// failed job never leaves a half-written document behind.
pub async fn seal_to_file(
    source: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobStats, PipelineError> {
    let output = seal(source, spec, config).await?;
    write_atomic(output_path.as_ref(), &output.pdf).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`seal`].
///
/// Creates a temporary tokio runtime internally.
pub fn seal_sync(
    source: impl AsRef<str>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::TaskFailed(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(seal(source, spec, config))
}

/// Page count, page sizes and raster detection for `bytes`.
pub fn inspect(bytes: &[u8]) -> Result<DocumentInfo, PipelineError> {
    document::inspect(bytes)
}

/// Read a local path or HTTP(S) URL into memory, checking for a PDF.
pub async fn read_source(source: &str, config: &PipelineConfig) -> Result<Vec<u8>, PipelineError> {
    let bytes = input::read_source(source, config.download_timeout_secs).await?;
    document::check_magic(&bytes)?;
    Ok(bytes)
}

/// Write `bytes` to `path` via a uniquely named sibling temp file that is
/// persisted over `path`. Concurrent writers never see each other's partial
/// files, and a failed write leaves nothing behind.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dest = path.to_path_buf();
    let write_failed = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".pdfseal-")
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::TaskFailed(format!("output write task: {}", e)))?
    .map_err(write_failed)
}

async fn run_job(
    source: Source<'_>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput, PipelineError> {
    // Caller-side validation happens before any storage is claimed.
    spec.validate()?;

    let job = PipelineJob::create(config.staging_dir.as_deref())?;
    info!("Starting job {}", job.id());

    match run_stages(&job, source, spec, config).await {
        Ok(output) => {
            job.release()?;
            Ok(output)
        }
        Err(e) => {
            let id = job.id().to_string();
            if let Err(release_err) = job.release() {
                warn!("Job {} failed and could not be released: {}", id, release_err);
            }
            warn!("Job {} failed ({}): {}", id, e.kind(), e);
            Err(e)
        }
    }
}

async fn run_stages(
    job: &PipelineJob,
    source: Source<'_>,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput, PipelineError> {
    let total_start = Instant::now();
    let progress = config.flatten.progress_callback.clone();
    let mut stats = JobStats::default();

    // ── Stage ────────────────────────────────────────────────────────────
    if let Some(ref cb) = progress {
        cb.on_stage_start(Stage::Stage);
    }
    let step = Instant::now();
    let source_bytes = match source {
        Source::Location(location) => {
            input::stage_source(location, job, config.download_timeout_secs).await?
        }
        Source::Bytes(bytes) => input::stage_bytes(bytes, job).await?,
    };
    stats.source_bytes = source_bytes.len() as u64;
    stats.stage_duration_ms = step.elapsed().as_millis() as u64;
    if let Some(ref cb) = progress {
        cb.on_stage_complete(Stage::Stage, stats.stage_duration_ms);
    }

    // ── Watermark ────────────────────────────────────────────────────────
    if let Some(ref cb) = progress {
        cb.on_stage_start(Stage::Watermark);
    }
    let step = Instant::now();
    let stage_spec = spec.clone();
    let watermarked =
        tokio::task::spawn_blocking(move || watermark::watermark(&source_bytes, &stage_spec))
            .await
            .map_err(|e| PipelineError::TaskFailed(format!("watermark task: {}", e)))??;
    job.store(Artifact::Watermarked, &watermarked).await?;
    stats.watermark_duration_ms = step.elapsed().as_millis() as u64;
    if let Some(ref cb) = progress {
        cb.on_stage_complete(Stage::Watermark, stats.watermark_duration_ms);
    }
    info!(
        "Job {}: watermarked in {} ms",
        job.id(),
        stats.watermark_duration_ms
    );

    // ── Flatten ──────────────────────────────────────────────────────────
    let flattened = flatten::flatten(watermarked, &config.flatten).await?;
    job.store(Artifact::Flattened, &flattened.pdf).await?;

    stats.page_count = flattened.pages.len();
    stats.output_bytes = flattened.pdf.len() as u64;
    stats.render_duration_ms = flattened.render_duration_ms;
    stats.assemble_duration_ms = flattened.assemble_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Job {} complete: {} pages, {} → {} bytes in {} ms",
        job.id(),
        stats.page_count,
        stats.source_bytes,
        stats.output_bytes,
        stats.total_duration_ms
    );

    Ok(JobOutput {
        job_id: job.id().to_string(),
        pdf: flattened.pdf,
        pages: flattened.pages,
        backend: flattened.backend,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlattenConfig;
    use crate::pipeline::render::{CancelFlag, PageRenderer, RenderBackend, RenderTarget, Session};
    use crate::test_support::{build_pdf, TestPage};
    use image::DynamicImage;
    use std::sync::Arc;

    /// Renders blank pages at the size the document declares.
    struct BlankBackend;

    struct BlankPages(Vec<(f32, f32)>);

    impl PageRenderer for BlankPages {
        fn page_count(&self) -> usize {
            self.0.len()
        }
        fn page_size(&self, index: usize) -> Result<(f32, f32), PipelineError> {
            Ok(self.0[index])
        }
        fn render_page(
            &mut self,
            _index: usize,
            target: RenderTarget,
            _cancel: &CancelFlag,
        ) -> Result<DynamicImage, PipelineError> {
            Ok(DynamicImage::new_rgb8(target.width, target.height))
        }
    }

    impl RenderBackend for BlankBackend {
        fn name(&self) -> &'static str {
            "blank"
        }
        fn with_document(&self, pdf: &[u8], session: &mut Session<'_>) -> Result<(), PipelineError> {
            session(&mut BlankPages(document::page_sizes(pdf)?))
        }
    }

    fn config_in(root: &Path) -> PipelineConfig {
        let flatten = FlattenConfig::builder()
            .scale(0.5)
            .backend(Arc::new(BlankBackend))
            .build()
            .unwrap();
        PipelineConfig::builder()
            .flatten(flatten)
            .staging_dir(root)
            .build()
            .unwrap()
    }

    fn staged_entries(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[tokio::test]
    async fn seal_bytes_flattens_and_releases() {
        let root = tempfile::tempdir().unwrap();
        let pdf = build_pdf(&[
            TestPage::text(612.0, 792.0, "one"),
            TestPage::text(1000.0, 1000.0, "two"),
        ]);
        let out = seal_bytes(pdf, &WatermarkSpec::new("Bob"), &config_in(root.path()))
            .await
            .unwrap();

        assert_eq!(out.stats.page_count, 2);
        assert!(out.job_id.starts_with("pdfseal-job-"));
        assert_eq!(out.backend, "blank");
        let info = inspect(&out.pdf).unwrap();
        assert!(info.is_flattened());
        assert_eq!(info.pages[1].image_size, Some((500, 500)));
        assert_eq!(staged_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn failed_job_still_releases_namespace() {
        let root = tempfile::tempdir().unwrap();
        let err = seal_bytes(b"%PDF-1.4 junk".to_vec(), &WatermarkSpec::new("x"), &config_in(root.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
        assert_eq!(staged_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn empty_label_is_rejected_before_staging() {
        let root = tempfile::tempdir().unwrap();
        let pdf = build_pdf(&[TestPage::text(100.0, 100.0, "x")]);
        let err = seal_bytes(pdf, &WatermarkSpec::new("  "), &config_in(root.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyLabel));
        assert_eq!(staged_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn seal_to_file_writes_atomically() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("in.pdf");
        std::fs::write(&src, build_pdf(&[TestPage::text(200.0, 300.0, "x")])).unwrap();
        let dest = src_dir.path().join("out").join("sealed.pdf");

        let stats = seal_to_file(
            src.to_str().unwrap(),
            &dest,
            &WatermarkSpec::new("Carol"),
            &config_in(root.path()),
        )
        .await
        .unwrap();

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written.len() as u64, stats.output_bytes);
        let leftovers: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("sealed.pdf")]);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_path_never_mix() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        let a = vec![b'a'; 256 * 1024];
        let b = vec![b'b'; 256 * 1024];

        let (ra, rb) = tokio::join!(write_atomic(&dest, &a), write_atomic(&dest, &b));
        ra.unwrap();
        rb.unwrap();

        let written = std::fs::read(&dest).unwrap();
        assert!(written == a || written == b, "output mixes both writers");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1, "temp files left behind");
    }

    #[tokio::test]
    async fn failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way makes the final rename fail.
        let dest = dir.path().join("taken");
        std::fs::create_dir_all(dest.join("child")).unwrap();

        let err = write_atomic(&dest, b"%PDF-1.7").await.unwrap_err();
        assert!(matches!(err, PipelineError::OutputWriteFailed { .. }), "got {err:?}");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("taken")]);
    }

    #[test]
    fn seal_sync_reports_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let err = seal_sync("/nonexistent/in.pdf", &WatermarkSpec::new("x"), &config_in(root.path()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
        assert!(err.is_retryable());
    }
}
