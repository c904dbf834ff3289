//! Pipeline stages for watermarking and flattening PDFs.
//!
//! Each submodule implements one transformation step and can be used and
//! tested on its own. Stages hand documents to each other as byte buffers;
//! none of them shares state with another.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ watermark ──▶ flatten ──────────────────────▶ output
//! (path/URL) (lopdf)      │ render (pdfium | pdftoppm)  ▲
//!                         └──▶ assemble (lopdf+image) ──┘
//! ```
//!
//! 1. [`input`]     stage a path, URL or buffer into the job namespace
//! 2. [`watermark`] overlay the label on every page
//! 3. [`flatten`]   drive a [`render::RenderBackend`] page by page under
//!    timeouts, then [`assemble`] the rasters into a new document
//!
//! [`document`] holds the decode/encode and page-geometry helpers shared by
//! all of them; [`subprocess`] is the external-process render backend.

pub mod assemble;
pub mod document;
pub mod flatten;
pub mod input;
pub mod render;
pub mod subprocess;
pub mod watermark;
