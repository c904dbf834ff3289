//! Configuration types for watermarking and flattening.
//!
//! The watermark itself is described by [`WatermarkSpec`], a plain value.
//! Everything that controls *how* a job runs (render scale, timeouts, backend,
//! staging location) lives in [`FlattenConfig`] and [`PipelineConfig`], built
//! via their builders so callers only set what they care about.

use crate::error::PipelineError;
use crate::pipeline::document::PageBox;
use crate::pipeline::render::{PdfiumBackend, RenderBackend};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Fixed prefix of every overlay label.
pub const LABEL_PREFIX: &str = "CONFIDENTIAL - ";

// ── Watermark ────────────────────────────────────────────────────────────

/// Where the label's baseline origin is placed on each page.
///
/// Both coordinates are derived from the page's own visible box, so pages of
/// different sizes in one document each get their own placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Horizontal offset in points from the page's horizontal centre.
    pub offset_x: f32,
    /// Vertical position as a fraction of the page height, from the bottom.
    pub y_ratio: f32,
}

impl Default for Anchor {
    fn default() -> Self {
        Self {
            offset_x: -250.0,
            y_ratio: 1.0 / 3.0,
        }
    }
}

impl Anchor {
    /// Absolute user-space origin of the label on a page with `page_box`.
    pub fn position(&self, page_box: &PageBox) -> (f32, f32) {
        (
            page_box.x0 + page_box.width / 2.0 + self.offset_x,
            page_box.y0 + page_box.height * self.y_ratio,
        )
    }
}

/// The overlay drawn on every page by the watermarker.
///
/// Only `text` is normally caller-supplied; the remaining fields default to
/// the house style (45°, 30 % opacity, 36 pt Helvetica, gray 0.75).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub text: String,
    pub anchor: Anchor,
    pub rotation_deg: f32,
    /// Fill alpha in `[0, 1]`.
    pub opacity: f32,
    pub font_size: f32,
    /// Fill gray level in `[0, 1]` (0 = black).
    pub gray: f32,
}

impl WatermarkSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            anchor: Anchor::default(),
            rotation_deg: 45.0,
            opacity: 0.3,
            font_size: 36.0,
            gray: 0.75,
        }
    }

    /// The exact string drawn on each page.
    pub fn label(&self) -> String {
        format!("{LABEL_PREFIX}{}", self.text)
    }

    /// Reject specs the watermarker cannot draw faithfully.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.text.trim().is_empty() {
            return Err(PipelineError::EmptyLabel);
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(PipelineError::InvalidConfig(format!(
                "opacity must be 0–1, got {}",
                self.opacity
            )));
        }
        if !(0.0..=1.0).contains(&self.gray) {
            return Err(PipelineError::InvalidConfig(format!(
                "gray must be 0–1, got {}",
                self.gray
            )));
        }
        if !(self.font_size > 0.0 && self.font_size.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "font size must be positive, got {}",
                self.font_size
            )));
        }
        Ok(())
    }
}

// ── Image quality ────────────────────────────────────────────────────────

/// Compression used for each page image in the flattened document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageQuality {
    /// Raw RGB compressed with Flate. Pixel-exact, larger files. (default)
    #[default]
    Lossless,
    /// JPEG (DCTDecode) at the given quality, 1–100.
    Jpeg(u8),
}

impl FromStr for ImageQuality {
    type Err = PipelineError;

    /// Parses `"lossless"` or a JPEG quality `1`–`100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("lossless") {
            return Ok(ImageQuality::Lossless);
        }
        let q: u8 = s.parse().map_err(|_| {
            PipelineError::InvalidConfig(format!("quality must be 'lossless' or 1–100, got '{s}'"))
        })?;
        if !(1..=100).contains(&q) {
            return Err(PipelineError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {q}"
            )));
        }
        Ok(ImageQuality::Jpeg(q))
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageQuality::Lossless => f.write_str("Flate lossless"),
            ImageQuality::Jpeg(q) => write!(f, "JPEG q={q}"),
        }
    }
}

// ── Flatten ──────────────────────────────────────────────────────────────

/// Configuration for the flatten stage.
///
/// Built via [`FlattenConfig::builder()`] or [`FlattenConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfseal::{FlattenConfig, ImageQuality};
///
/// let config = FlattenConfig::builder()
///     .scale(1.5)
///     .page_timeout_ms(5_000)
///     .quality(ImageQuality::Jpeg(85))
///     .build()
///     .unwrap();
/// assert_eq!(config.scale, 1.5);
/// ```
#[derive(Clone)]
pub struct FlattenConfig {
    /// Pixels per PDF point. Range: 0.25–8.0. Default: 2.0 (144 DPI).
    pub scale: f32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 10000.
    ///
    /// Applied after `scale`; the other edge shrinks proportionally so the
    /// aspect ratio of the source page is kept.
    pub max_rendered_pixels: u32,

    /// Upper bound for rendering a single page. Default: 10 000 ms.
    pub page_timeout_ms: u64,

    /// Upper bound for the backend to open the document. Default: 60 000 ms.
    ///
    /// Includes any wait for a shared backend (pdfium is serialised
    /// process-wide).
    pub open_timeout_ms: u64,

    /// Page image compression. Default: [`ImageQuality::Lossless`].
    pub quality: ImageQuality,

    /// Size output pages like the source pages (in points) instead of like
    /// the rendered images (1 px = 1 pt). Default: false.
    pub preserve_page_size: bool,

    /// Rendering backend. Default: [`PdfiumBackend`] with library discovery.
    pub backend: Arc<dyn RenderBackend>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            scale: 2.0,
            max_rendered_pixels: 10_000,
            page_timeout_ms: 10_000,
            open_timeout_ms: 60_000,
            quality: ImageQuality::default(),
            preserve_page_size: false,
            backend: Arc::new(PdfiumBackend::default()),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FlattenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenConfig")
            .field("scale", &self.scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page_timeout_ms", &self.page_timeout_ms)
            .field("open_timeout_ms", &self.open_timeout_ms)
            .field("quality", &self.quality)
            .field("preserve_page_size", &self.preserve_page_size)
            .field("backend", &self.backend.name())
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl FlattenConfig {
    pub fn builder() -> FlattenConfigBuilder {
        FlattenConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Builder for [`FlattenConfig`].
#[derive(Debug)]
pub struct FlattenConfigBuilder {
    config: FlattenConfig,
}

impl FlattenConfigBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale.clamp(0.25, 8.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(16);
        self
    }

    pub fn page_timeout_ms(mut self, ms: u64) -> Self {
        self.config.page_timeout_ms = ms;
        self
    }

    pub fn open_timeout_ms(mut self, ms: u64) -> Self {
        self.config.open_timeout_ms = ms;
        self
    }

    pub fn quality(mut self, quality: ImageQuality) -> Self {
        self.config.quality = quality;
        self
    }

    pub fn preserve_page_size(mut self, v: bool) -> Self {
        self.config.preserve_page_size = v;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FlattenConfig, PipelineError> {
        let c = &self.config;
        if !c.scale.is_finite() {
            return Err(PipelineError::InvalidConfig("scale must be finite".into()));
        }
        if c.page_timeout_ms == 0 || c.open_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "timeouts must be ≥ 1ms".into(),
            ));
        }
        if let ImageQuality::Jpeg(q) = c.quality {
            if !(1..=100).contains(&q) {
                return Err(PipelineError::InvalidConfig(format!(
                    "JPEG quality must be 1–100, got {q}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Configuration for a full watermark → flatten job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flatten-stage settings (also carries the progress callback).
    pub flatten: FlattenConfig,

    /// Parent directory for per-job staging namespaces.
    /// Default: the system temp directory.
    pub staging_dir: Option<PathBuf>,

    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flatten: FlattenConfig::default(),
            staging_dir: None,
            download_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn flatten(mut self, flatten: FlattenConfig) -> Self {
        self.config.flatten = flatten;
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        if self.config.download_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "download timeout must be ≥ 1s".into(),
            ));
        }
        if let Some(dir) = &self.config.staging_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(PipelineError::InvalidConfig(format!(
                    "staging dir '{}' is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_match_house_style() {
        let spec = WatermarkSpec::new("Shared with: a@b.c");
        assert_eq!(spec.rotation_deg, 45.0);
        assert_eq!(spec.opacity, 0.3);
        assert_eq!(spec.font_size, 36.0);
        assert_eq!(spec.gray, 0.75);
        assert_eq!(spec.label(), "CONFIDENTIAL - Shared with: a@b.c");
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = WatermarkSpec::new("   ").validate().unwrap_err();
        assert!(matches!(err, PipelineError::EmptyLabel));
    }

    #[test]
    fn out_of_range_opacity_is_rejected() {
        let mut spec = WatermarkSpec::new("x");
        spec.opacity = 1.5;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn anchor_follows_page_box() {
        let anchor = Anchor::default();
        let letter = PageBox::new(0.0, 0.0, 612.0, 792.0);
        let square = PageBox::new(0.0, 0.0, 1000.0, 1000.0);
        let (x, y) = anchor.position(&letter);
        assert!((x - 56.0).abs() < 1e-3 && (y - 264.0).abs() < 1e-3);
        let (x, y) = anchor.position(&square);
        assert!((x - 250.0).abs() < 1e-3);
        assert!((y - 333.333).abs() < 0.01);
    }

    #[test]
    fn anchor_respects_box_origin() {
        let shifted = PageBox::new(100.0, 50.0, 612.0, 792.0);
        let (x, y) = Anchor::default().position(&shifted);
        assert!((x - 156.0).abs() < 1e-3 && (y - 314.0).abs() < 1e-3);
    }

    #[test]
    fn quality_parsing() {
        assert_eq!("lossless".parse::<ImageQuality>().unwrap(), ImageQuality::Lossless);
        assert_eq!("85".parse::<ImageQuality>().unwrap(), ImageQuality::Jpeg(85));
        assert!("0".parse::<ImageQuality>().is_err());
        assert!("101".parse::<ImageQuality>().is_err());
        assert!("high".parse::<ImageQuality>().is_err());
    }

    #[test]
    fn builder_clamps_scale() {
        let c = FlattenConfig::builder().scale(100.0).build().unwrap();
        assert_eq!(c.scale, 8.0);
        let c = FlattenConfig::builder().scale(0.0).build().unwrap();
        assert_eq!(c.scale, 0.25);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(FlattenConfig::builder().page_timeout_ms(0).build().is_err());
    }

    #[test]
    fn debug_names_backend() {
        let dbg = format!("{:?}", FlattenConfig::default());
        assert!(dbg.contains("pdfium"), "got: {dbg}");
    }
}
