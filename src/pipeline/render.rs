//! Rendering backends: turn each page of a PDF into a raster image.
//!
//! A [`RenderBackend`] opens a document for the duration of one scoped
//! session and hands the caller a [`PageRenderer`]. Everything the backend
//! acquires (library handles, document handles, scratch files, child
//! processes) is released before [`RenderBackend::with_document`] returns,
//! whether the session ended normally, with an error, or was cancelled.
//!
//! Sessions run on a blocking thread (see [`crate::pipeline::flatten`]):
//! pdfium keeps global state and is CPU-bound, so it never runs on an async
//! worker thread.
//!
//! ## Target size
//!
//! Pages are rendered at `scale` device pixels per point, and the longest
//! edge is then capped at `max_rendered_pixels` so an A0 poster does not
//! allocate a gigabyte-sized bitmap. The cap keeps the page's aspect ratio.

use crate::error::PipelineError;
use image::{imageops::FilterType, DynamicImage};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Environment variable consulted for the pdfium library location.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// A cross-thread cancellation signal shared by the flattener and a session.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A guard that raises the flag when dropped.
    ///
    /// Held by the async side of a flatten so that dropping its future (task
    /// abort, `select!`, runtime shutdown) stops the session as well.
    pub fn guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// See [`CancelFlag::guard`].
#[derive(Debug)]
pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Pixel dimensions requested for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    /// Target for a page of `size` points (display orientation).
    pub fn for_page(size: (f32, f32), scale: f32, max_rendered_pixels: u32) -> Self {
        let mut w = (f64::from(size.0) * f64::from(scale)).round().max(1.0);
        let mut h = (f64::from(size.1) * f64::from(scale)).round().max(1.0);
        let longest = w.max(h);
        let cap = f64::from(max_rendered_pixels.max(1));
        if longest > cap {
            let factor = cap / longest;
            w = (w * factor).round().max(1.0);
            h = (h * factor).round().max(1.0);
        }
        Self {
            width: w as u32,
            height: h as u32,
        }
    }

    /// Resize `image` to exactly this target when a backend missed it by
    /// rounding.
    pub fn fit(&self, image: DynamicImage) -> DynamicImage {
        if image.width() == self.width && image.height() == self.height {
            image
        } else {
            debug!(
                "Resizing {}x{} raster to target {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            );
            image.resize_exact(self.width, self.height, FilterType::Triangle)
        }
    }
}

/// An open document inside a backend session.
pub trait PageRenderer {
    fn page_count(&self) -> usize;

    /// Display size of page `index` (0-based) in points, rotation applied.
    fn page_size(&self, index: usize) -> Result<(f32, f32), PipelineError>;

    /// Rasterise page `index` (0-based) at `target`.
    ///
    /// Implementations should check `cancel` before starting and, where the
    /// underlying engine allows it, while rendering.
    fn render_page(
        &mut self,
        index: usize,
        target: RenderTarget,
        cancel: &CancelFlag,
    ) -> Result<DynamicImage, PipelineError>;
}

/// The body of a backend session.
pub type Session<'s> = dyn FnMut(&mut dyn PageRenderer) -> Result<(), PipelineError> + 's;

/// A swappable rasteriser.
///
/// Implementations must be usable from any thread; a single backend value
/// may serve several jobs at once.
pub trait RenderBackend: Send + Sync {
    /// Short identifier used in logs and job output.
    fn name(&self) -> &'static str;

    /// Open `pdf`, run `session` against it, and release every resource
    /// acquired for it before returning.
    fn with_document(&self, pdf: &[u8], session: &mut Session<'_>) -> Result<(), PipelineError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// pdfium is not re-entrant; all sessions in the process take turns.
static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Renders through the pdfium library via `pdfium-render`.
///
/// The library is located in this order: the explicit path given to
/// [`PdfiumBackend::with_library_path`], the `PDFIUM_LIB_PATH` environment
/// variable, the current directory, then the system library search path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the pdfium library at `path` (a file, or a directory holding
    /// the platform's library name).
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    /// Check that the library can be bound, without opening a document.
    pub fn probe(&self) -> Result<(), PipelineError> {
        let _lock = PDFIUM_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        self.bind().map(|_| ())
    }

    fn bind(&self) -> Result<Pdfium, PipelineError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_ENV).map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path)
                } else {
                    path.clone()
                };
                Pdfium::bind_to_library(&lib).map_err(|e| {
                    PipelineError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
                })?
            }
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl RenderBackend for PdfiumBackend {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn with_document(&self, pdf: &[u8], session: &mut Session<'_>) -> Result<(), PipelineError> {
        let _lock = PDFIUM_LOCK.lock().unwrap_or_else(|p| {
            warn!("pdfium lock was poisoned by a panicked session; continuing");
            p.into_inner()
        });

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.contains("Password") || detail.contains("password") {
                    PipelineError::Encrypted
                } else {
                    PipelineError::CorruptPdf { detail }
                }
            })?;

        let mut renderer = PdfiumRenderer {
            document: &document,
        };
        info!("pdfium opened document: {} pages", renderer.page_count());
        session(&mut renderer)
        // document, then the library bindings, then the lock drop here.
    }
}

struct PdfiumRenderer<'d, 'a> {
    document: &'d PdfDocument<'a>,
}

impl<'a> PdfiumRenderer<'_, 'a> {
    fn page(&self, index: usize) -> Result<PdfPage<'a>, PipelineError> {
        let idx = u16::try_from(index).map_err(|_| PipelineError::RasterisationFailed {
            page: index + 1,
            detail: "page index exceeds pdfium's range".into(),
        })?;
        self.document
            .pages()
            .get(idx)
            .map_err(|e| PipelineError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            })
    }
}

impl PageRenderer for PdfiumRenderer<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32), PipelineError> {
        let page = self.page(index)?;
        Ok((page.width().value, page.height().value))
    }

    fn render_page(
        &mut self,
        index: usize,
        target: RenderTarget,
        cancel: &CancelFlag,
    ) -> Result<DynamicImage, PipelineError> {
        // A pdfium render call cannot be interrupted once started.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { page: index + 1 });
        }
        let page = self.page(index)?;
        let render_config = PdfRenderConfig::new()
            .set_target_width(target.width as i32)
            .set_maximum_height(target.height as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PipelineError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            }
        })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(target.fit(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_scales_points_to_pixels() {
        let t = RenderTarget::for_page((612.0, 792.0), 2.0, 10_000);
        assert_eq!(t, RenderTarget { width: 1224, height: 1584 });
    }

    #[test]
    fn target_caps_longest_edge_keeping_aspect() {
        let t = RenderTarget::for_page((1000.0, 2000.0), 4.0, 1000);
        assert_eq!(t, RenderTarget { width: 500, height: 1000 });
    }

    #[test]
    fn target_never_collapses_to_zero() {
        let t = RenderTarget::for_page((0.1, 5000.0), 1.0, 100);
        assert_eq!(t.height, 100);
        assert_eq!(t.width, 1);
    }

    #[test]
    fn fit_resizes_only_when_needed() {
        let target = RenderTarget { width: 10, height: 20 };
        let exact = DynamicImage::new_rgb8(10, 20);
        assert_eq!(target.fit(exact).width(), 10);
        let off = DynamicImage::new_rgb8(10, 19);
        let fitted = target.fit(off);
        assert_eq!((fitted.width(), fitted.height()), (10, 20));
    }

    #[test]
    fn cancel_guard_raises_flag_on_drop() {
        let flag = CancelFlag::new();
        {
            let _guard = flag.guard();
            assert!(!flag.is_cancelled());
        }
        assert!(flag.is_cancelled());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let a = CancelFlag::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    fn pdfium_backend_reports_its_name() {
        assert_eq!(PdfiumBackend::default().name(), "pdfium");
    }

    #[test]
    fn missing_explicit_library_is_a_binding_failure() {
        let backend = PdfiumBackend::with_library_path("/nonexistent/libpdfium.so");
        let err = backend.probe().unwrap_err();
        assert!(matches!(err, PipelineError::PdfiumBindingFailed(_)), "got {err:?}");
        assert_eq!(err.kind(), crate::error::ErrorKind::Resource);
    }
}
