//! Progress-callback trait for stage and per-page events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::FlattenConfigBuilder::progress_callback`] to receive
//! events as a job moves through its stages and as each page is rasterised.
//!
//! Callers forward events wherever they like (a terminal progress bar, a log,
//! a chat message update) without the library knowing how the host
//! application communicates.
//!
//! # Example
//!
//! ```rust
//! use pdfseal::{FlattenConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_rendered(&self, page_num: usize, total_pages: usize, width: u32, height: u32) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages}: {width}x{height}");
//!     }
//! }
//!
//! let config = FlattenConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { rendered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The stages of a job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Copy or download the source into the job's staging namespace.
    Stage,
    Watermark,
    /// Rasterise every page.
    Render,
    /// Re-encode the rasters into the output document.
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Stage => "stage",
            Stage::Watermark => "watermark",
            Stage::Render => "render",
            Stage::Assemble => "assemble",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as it runs.
///
/// Implementations must be `Send + Sync`: render events are emitted from the
/// async side of the flattener, which may run on any runtime worker thread.
/// All methods have no-op defaults so callers only override what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once the rendering backend has opened the document.
    fn on_render_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after page `page_num` (1-indexed) has been rasterised.
    fn on_page_rendered(&self, page_num: usize, total_pages: usize, width: u32, height: u32) {
        let _ = (page_num, total_pages, width, height);
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FlattenConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<Stage>>,
        pages: AtomicUsize,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_page_rendered(&self, _page_num: usize, _total: usize, _w: u32, _h: u32) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Watermark);
        cb.on_render_start(3);
        cb.on_page_rendered(1, 3, 100, 100);
        cb.on_stage_complete(Stage::Render, 12);
    }

    #[test]
    fn recorder_sees_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_stage_start(Stage::Watermark);
        cb.on_stage_start(Stage::Render);
        cb.on_page_rendered(1, 2, 10, 10);
        cb.on_page_rendered(2, 2, 10, 10);
        assert_eq!(*rec.stages.lock().unwrap(), vec![Stage::Watermark, Stage::Render]);
        assert_eq!(rec.pages.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Assemble.to_string(), "assemble");
    }
}
