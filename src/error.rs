//! Error types for the pdfseal library.
//!
//! Every failure is fatal to the job that hit it: a watermarked-then-flattened
//! document with a missing or misplaced page is worse than no document, so
//! there is no page-level "partial success" type. Instead each variant belongs
//! to one [`ErrorKind`], which is what callers branch on:
//!
//! * [`ErrorKind::Decode`]: the input is not a usable PDF. Never retry.
//! * [`ErrorKind::Render`]: a page failed to rasterise or timed out.
//! * [`ErrorKind::Encode`]: the output document could not be serialised.
//! * [`ErrorKind::Resource`]: staging storage, the source fetch, or the
//!   rendering backend could not be acquired or released.
//! * [`ErrorKind::Config`]: the caller passed invalid options.
//!
//! Retry policy belongs to the caller; [`PipelineError::is_retryable`] tells
//! it which failures are worth a bounded second attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure class used for user-facing messages and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    Render,
    Encode,
    Resource,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Render => "render",
            ErrorKind::Encode => "encode",
            ErrorKind::Resource => "resource",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// All errors returned by the pdfseal library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Decode errors ─────────────────────────────────────────────────────
    /// The bytes do not start with the `%PDF` header.
    #[error("Input is not a PDF document (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF header is present but the body could not be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// The document is encrypted; pdfseal does not handle passwords.
    #[error("PDF is encrypted; decrypt it first (e.g. qpdf --decrypt input.pdf output.pdf)")]
    Encrypted,

    /// The document parsed but contains no pages.
    #[error("PDF has no pages; nothing to watermark or flatten")]
    EmptyDocument,

    // ── Render errors ─────────────────────────────────────────────────────
    /// The backend returned an error for a specific page (1-indexed).
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A page did not finish rendering within the per-page timeout.
    #[error("Page {page} did not render within {timeout_ms}ms")]
    RenderTimeout { page: usize, timeout_ms: u64 },

    /// The backend did not open the document within the open timeout.
    #[error("Rendering backend did not open the document within {timeout_ms}ms")]
    OpenTimeout { timeout_ms: u64 },

    /// The backend stopped producing pages before the document was complete.
    #[error("Rendering backend produced {rendered} of {expected} pages")]
    IncompleteRender { rendered: usize, expected: usize },

    /// The job was cancelled while rendering was in flight.
    #[error("Rendering cancelled at page {page}")]
    Cancelled { page: usize },

    // ── Encode errors ─────────────────────────────────────────────────────
    /// Serialising a PDF (watermarked or flattened) failed.
    #[error("Failed to encode {stage} document: {detail}")]
    EncodeFailed { stage: &'static str, detail: String },

    /// Compressing a rendered page into an image stream failed.
    #[error("Failed to encode image for page {page}: {detail}")]
    ImageEncodeFailed { page: usize, detail: String },

    // ── Resource errors ───────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the source file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Creating, writing or reading the job's staging storage failed.
    #[error("Staging storage error at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing the job's staging storage failed.
    #[error("Failed to release staging directory '{path}': {source}")]
    StagingRelease {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the final output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib), place the\n\
library in the working directory, or install it system-wide.\n\
Alternatively use --backend pdftoppm (requires poppler-utils)."
    )]
    PdfiumBindingFailed(String),

    /// The external rasteriser process could not be started or reaped.
    #[error("Failed to run rasteriser '{program}': {detail}")]
    ProcessFailed { program: String, detail: String },

    /// A background task panicked or was aborted by the runtime.
    #[error("Internal task failure: {0}")]
    TaskFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Watermark label was empty after trimming.
    #[error("Watermark text must not be empty")]
    EmptyLabel,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        use PipelineError::*;
        match self {
            NotAPdf { .. } | CorruptPdf { .. } | Encrypted | EmptyDocument => ErrorKind::Decode,
            RasterisationFailed { .. }
            | RenderTimeout { .. }
            | OpenTimeout { .. }
            | IncompleteRender { .. }
            | Cancelled { .. } => ErrorKind::Render,
            EncodeFailed { .. } | ImageEncodeFailed { .. } => ErrorKind::Encode,
            FileNotFound { .. }
            | PermissionDenied { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | Staging { .. }
            | StagingRelease { .. }
            | OutputWriteFailed { .. }
            | PdfiumBindingFailed(_)
            | ProcessFailed { .. }
            | TaskFailed(_) => ErrorKind::Resource,
            EmptyLabel | InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// Whether a caller-side retry of the whole job could plausibly succeed.
    ///
    /// Malformed input stays malformed and a cancelled job was cancelled on
    /// purpose, so neither is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Cancelled { .. } => false,
            e => matches!(e.kind(), ErrorKind::Render | ErrorKind::Resource),
        }
    }

    pub(crate) fn corrupt(err: impl fmt::Display) -> Self {
        PipelineError::CorruptPdf {
            detail: err.to_string(),
        }
    }

    pub(crate) fn encode(stage: &'static str, err: impl fmt::Display) -> Self {
        PipelineError::EncodeFailed {
            stage,
            detail: err.to_string(),
        }
    }

    pub(crate) fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Staging {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_never_retryable() {
        let e = PipelineError::CorruptPdf {
            detail: "bad xref".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Decode);
        assert!(!e.is_retryable());
        assert!(!PipelineError::EmptyDocument.is_retryable());
    }

    #[test]
    fn render_timeout_is_retryable() {
        let e = PipelineError::RenderTimeout {
            page: 3,
            timeout_ms: 5000,
        };
        assert_eq!(e.kind(), ErrorKind::Render);
        assert!(e.is_retryable());
        assert!(e.to_string().contains("Page 3"));
        assert!(e.to_string().contains("5000ms"));
    }

    #[test]
    fn cancellation_is_render_kind_but_not_retryable() {
        let e = PipelineError::Cancelled { page: 2 };
        assert_eq!(e.kind(), ErrorKind::Render);
        assert!(!e.is_retryable());
    }

    #[test]
    fn binding_failure_is_resource_kind() {
        let e = PipelineError::PdfiumBindingFailed("no such file".into());
        assert_eq!(e.kind(), ErrorKind::Resource);
        assert!(e.is_retryable());
        assert!(e.to_string().contains("PDFIUM_LIB_PATH"));
    }

    #[test]
    fn encode_failure_display() {
        let e = PipelineError::encode("flattened", "disk full");
        assert_eq!(e.kind(), ErrorKind::Encode);
        assert!(!e.is_retryable());
        let msg = e.to_string();
        assert!(msg.contains("flattened"), "got: {msg}");
        assert!(msg.contains("disk full"), "got: {msg}");
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(ErrorKind::Resource.to_string(), "resource");
        assert_eq!(ErrorKind::Decode.to_string(), "decode");
    }
}
