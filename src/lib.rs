//! # pdfseal
//!
//! Stamp a confidentiality label on every page of a PDF, then flatten the
//! document so the label cannot be lifted off again.
//!
//! ## Why flatten?
//!
//! A watermark drawn as text or vector art is just another content-stream
//! element: any PDF editor can delete it. Flattening renders every page to
//! a bitmap and rebuilds the document from those bitmaps, so the label
//! becomes pixels like everything else on the page. The output has no text
//! layer, no fonts and no vector objects left to strip.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Stage      copy or download the source into a private job dir
//!  ├─ 2. Watermark  "CONFIDENTIAL - …" at 45°, 30 % opacity, per page size
//!  ├─ 3. Render     rasterise page 1..N in order (pdfium or pdftoppm)
//!  ├─ 4. Assemble   one full-bleed image per page, in page order
//!  └─ 5. Release    remove the job dir on every exit path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfseal::{seal, PipelineConfig, WatermarkSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = WatermarkSpec::new("Shared with: alice@example.com");
//!     let output = seal("report.pdf", &spec, &PipelineConfig::default()).await?;
//!     std::fs::write("report.sealed.pdf", &output.pdf)?;
//!     eprintln!("{} pages in {} ms", output.stats.page_count, output.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfseal` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfseal = { version = "0.1", default-features = false }
//! ```
//!
//! ## Rendering backends
//!
//! | Backend | Needs | Notes |
//! |---------|-------|-------|
//! | [`PdfiumBackend`]   | libpdfium (`PDFIUM_LIB_PATH`, `./`, or system) | default, in-process, serialised |
//! | [`PdftoppmBackend`] | `pdftoppm` on `PATH` (poppler-utils) | one child process per page |
//!
//! Anything implementing [`RenderBackend`] can be plugged in through
//! [`FlattenConfigBuilder::backend`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;

#[cfg(test)]
pub(crate) mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Anchor, FlattenConfig, FlattenConfigBuilder, ImageQuality, PipelineConfig,
    PipelineConfigBuilder, WatermarkSpec, LABEL_PREFIX,
};
pub use convert::{inspect, read_source, seal, seal_bytes, seal_sync, seal_to_file, write_atomic};
pub use error::{ErrorKind, PipelineError};
pub use job::{Artifact, PipelineJob};
pub use output::{DocumentInfo, FlattenOutput, JobOutput, JobStats, PageInfo, RenderedPageStats};
pub use pipeline::flatten::{flatten, flatten_sync};
pub use pipeline::render::{CancelFlag, PageRenderer, PdfiumBackend, RenderBackend, RenderTarget, Session};
pub use pipeline::subprocess::PdftoppmBackend;
pub use pipeline::watermark::watermark;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
