//! Result types returned by the pipeline stages and [`crate::inspect`].

use serde::{Deserialize, Serialize};

/// Geometry and kind of a single page, as reported by [`crate::inspect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Display width in points (page rotation applied).
    pub width: f32,
    /// Display height in points (page rotation applied).
    pub height: f32,
    /// `/Rotate` value normalised to 0, 90, 180 or 270.
    pub rotation: i32,
    /// True when the page draws exactly one image XObject and nothing else.
    pub is_raster: bool,
    /// Pixel size of that image, when `is_raster`.
    pub image_size: Option<(u32, u32)>,
}

/// Summary of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub pdf_version: String,
    pub pages: Vec<PageInfo>,
}

impl DocumentInfo {
    /// True when every page is a single full-bleed raster.
    pub fn is_flattened(&self) -> bool {
        !self.pages.is_empty() && self.pages.iter().all(|p| p.is_raster)
    }
}

/// Per-page record of the flatten stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPageStats {
    pub page_num: usize,
    pub width_px: u32,
    pub height_px: u32,
    pub render_ms: u64,
}

/// Output of [`crate::flatten`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenOutput {
    /// The flattened document.
    #[serde(skip)]
    pub pdf: Vec<u8>,
    pub pages: Vec<RenderedPageStats>,
    pub backend: String,
    pub render_duration_ms: u64,
    pub assemble_duration_ms: u64,
}

/// Timing and size summary of a full job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub page_count: usize,
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub stage_duration_ms: u64,
    pub watermark_duration_ms: u64,
    pub render_duration_ms: u64,
    pub assemble_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Output of [`crate::seal`] and friends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    /// Name of the (already released) staging namespace, for log correlation.
    pub job_id: String,
    /// The watermarked and flattened document.
    #[serde(skip)]
    pub pdf: Vec<u8>,
    pub pages: Vec<RenderedPageStats>,
    pub backend: String,
    pub stats: JobStats,
}
