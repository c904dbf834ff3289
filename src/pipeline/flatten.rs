//! Flattener: rasterise every page and rebuild the document from the images.
//!
//! ## Threading
//!
//! The backend session runs inside `tokio::task::spawn_blocking` and reports
//! back over a bounded channel, one event per page. The async side waits for
//! each event under a timeout, so a page that hangs inside the backend fails
//! the job after `page_timeout` instead of blocking it forever.
//!
//! ## Cleanup
//!
//! A timed-out or cancelled flatten raises the shared [`CancelFlag`] and
//! returns at once. The worker notices the flag (or the closed channel)
//! before its next page and unwinds its session, which releases the
//! backend's document, library handle and scratch files on the worker
//! thread. Dropping the future returned by [`flatten`] has the same effect.
//!
//! ## Ordering
//!
//! Pages are stored in a slot per page index and assembled by iterating the
//! indices, never by arrival order. A page arriving out of sequence, twice,
//! or past the end fails the job, as does a backend whose page count differs
//! from the document's own page tree.

use crate::config::FlattenConfig;
use crate::error::PipelineError;
use crate::output::{FlattenOutput, RenderedPageStats};
use crate::pipeline::assemble::{self, PageImage};
use crate::pipeline::document;
use crate::pipeline::render::{CancelFlag, PageRenderer, RenderBackend, RenderTarget};
use crate::progress::Stage;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Messages from the render worker to the async side.
enum RenderEvent {
    Opened {
        page_count: usize,
    },
    Page {
        index: usize,
        image: DynamicImage,
        source_size: (f32, f32),
        render_ms: u64,
    },
}

struct RenderJob {
    backend: Arc<dyn RenderBackend>,
    pdf: Vec<u8>,
    scale: f32,
    max_rendered_pixels: u32,
}

/// Render every page of `pdf` and reassemble the rasters into a new PDF.
///
/// # Errors
///
/// * Decode kind when the input is not a PDF, cannot be parsed, has no
///   pages, or the backend cannot open it.
/// * Render kind on a page failure, a page or open timeout, a backend page
///   count that disagrees with the document, or an out-of-sequence render.
/// * Encode kind when the output document cannot be built.
/// * Resource kind when the backend cannot be acquired.
pub async fn flatten(pdf: Vec<u8>, config: &FlattenConfig) -> Result<FlattenOutput, PipelineError> {
    // The document's own page tree is the reference page count, whatever
    // the backend later reports.
    let expected_pages = document::page_sizes(&pdf)?.len();
    let backend_name = config.backend.name();
    let progress = config.progress_callback.clone();

    if let Some(ref cb) = progress {
        cb.on_stage_start(Stage::Render);
    }
    let render_start = Instant::now();

    let cancel = CancelFlag::new();
    let _cancel_on_drop = cancel.guard();
    let (tx, mut rx) = mpsc::channel::<RenderEvent>(1);

    let job = RenderJob {
        backend: Arc::clone(&config.backend),
        pdf,
        scale: config.scale,
        max_rendered_pixels: config.max_rendered_pixels,
    };
    let worker_cancel = cancel.clone();
    let mut worker = tokio::task::spawn_blocking(move || render_worker(job, tx, worker_cancel));

    // ── Open ─────────────────────────────────────────────────────────────
    let page_count = match timeout(config.open_timeout(), rx.recv()).await {
        Ok(Some(RenderEvent::Opened { page_count })) => page_count,
        Ok(Some(RenderEvent::Page { index, .. })) => {
            cancel.cancel();
            return Err(PipelineError::RasterisationFailed {
                page: index + 1,
                detail: "backend produced a page before opening the document".into(),
            });
        }
        Ok(None) => return Err(worker_failure(&mut worker, 0, 0).await),
        Err(_) => {
            cancel.cancel();
            warn!(
                "{} did not open the document within {} ms",
                backend_name, config.open_timeout_ms
            );
            return Err(PipelineError::OpenTimeout {
                timeout_ms: config.open_timeout_ms,
            });
        }
    };

    if page_count == 0 {
        cancel.cancel();
        return Err(PipelineError::EmptyDocument);
    }
    if page_count != expected_pages {
        cancel.cancel();
        warn!(
            "{} reported {} pages, document has {}",
            backend_name, page_count, expected_pages
        );
        return Err(PipelineError::IncompleteRender {
            rendered: page_count,
            expected: expected_pages,
        });
    }
    info!("Rendering {} pages with {}", page_count, backend_name);
    if let Some(ref cb) = progress {
        cb.on_render_start(page_count);
    }

    // ── Pages ────────────────────────────────────────────────────────────
    let mut slots: Vec<Option<PageImage>> = (0..page_count).map(|_| None).collect();
    let mut stats = Vec::with_capacity(page_count);

    for expected in 0..page_count {
        let event = match timeout(config.page_timeout(), rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Err(worker_failure(&mut worker, expected, page_count).await),
            Err(_) => {
                cancel.cancel();
                warn!(
                    "Page {} did not render within {} ms; cancelling",
                    expected + 1,
                    config.page_timeout_ms
                );
                return Err(PipelineError::RenderTimeout {
                    page: expected + 1,
                    timeout_ms: config.page_timeout_ms,
                });
            }
        };

        let RenderEvent::Page {
            index,
            image,
            source_size,
            render_ms,
        } = event
        else {
            cancel.cancel();
            return Err(PipelineError::RasterisationFailed {
                page: expected + 1,
                detail: "backend reopened the document mid-render".into(),
            });
        };

        if index != expected || slots.get(index).map_or(true, Option::is_some) {
            cancel.cancel();
            return Err(PipelineError::RasterisationFailed {
                page: index + 1,
                detail: format!("page arrived out of sequence (expected page {})", expected + 1),
            });
        }

        let (width_px, height_px) = (image.width(), image.height());
        debug!(
            "Page {}/{} rendered: {}x{} px in {} ms",
            index + 1,
            page_count,
            width_px,
            height_px,
            render_ms
        );
        if let Some(ref cb) = progress {
            cb.on_page_rendered(index + 1, page_count, width_px, height_px);
        }
        stats.push(RenderedPageStats {
            page_num: index + 1,
            width_px,
            height_px,
            render_ms,
        });
        slots[index] = Some(PageImage { image, source_size });
    }

    // The worker releases the backend once the last page is sent. Waiting
    // for that keeps its errors (e.g. a failed teardown) visible, but a
    // backend that hangs on close must not hold up a finished render.
    match timeout(config.page_timeout(), &mut worker).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e),
        Ok(Err(join)) => return Err(PipelineError::TaskFailed(format!("render worker: {}", join))),
        Err(_) => {
            cancel.cancel();
            warn!("{} did not release the document in time; continuing", backend_name);
        }
    }

    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    if let Some(ref cb) = progress {
        cb.on_stage_complete(Stage::Render, render_duration_ms);
        cb.on_stage_start(Stage::Assemble);
    }

    // ── Assemble ─────────────────────────────────────────────────────────
    let pages = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or(PipelineError::IncompleteRender {
                rendered: index,
                expected: page_count,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let assemble_start = Instant::now();
    let quality = config.quality;
    let preserve = config.preserve_page_size;
    let pdf = tokio::task::spawn_blocking(move || assemble::build_pdf(&pages, quality, preserve))
        .await
        .map_err(|e| PipelineError::TaskFailed(format!("assemble task: {}", e)))??;
    let assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = progress {
        cb.on_stage_complete(Stage::Assemble, assemble_duration_ms);
    }
    info!(
        "Flattened {} pages ({} bytes) in {} ms",
        page_count,
        pdf.len(),
        render_duration_ms + assemble_duration_ms
    );

    Ok(FlattenOutput {
        pdf,
        pages: stats,
        backend: backend_name.to_string(),
        render_duration_ms,
        assemble_duration_ms,
    })
}

/// Blocking wrapper around [`flatten`] for callers without a runtime.
pub fn flatten_sync(pdf: Vec<u8>, config: &FlattenConfig) -> Result<FlattenOutput, PipelineError> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::TaskFailed(format!("failed to start runtime: {}", e)))?;
    rt.block_on(flatten(pdf, config))
}

/// The worker closed the channel early: surface its own error, if any.
async fn worker_failure(
    worker: &mut JoinHandle<Result<(), PipelineError>>,
    rendered: usize,
    expected: usize,
) -> PipelineError {
    match worker.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => PipelineError::IncompleteRender { rendered, expected },
        Err(join) => PipelineError::TaskFailed(format!("render worker: {}", join)),
    }
}

/// Body of the blocking render thread.
fn render_worker(
    job: RenderJob,
    tx: mpsc::Sender<RenderEvent>,
    cancel: CancelFlag,
) -> Result<(), PipelineError> {
    let RenderJob {
        backend,
        pdf,
        scale,
        max_rendered_pixels,
    } = job;

    let mut session = |renderer: &mut dyn PageRenderer| -> Result<(), PipelineError> {
        let page_count = renderer.page_count();
        if tx.blocking_send(RenderEvent::Opened { page_count }).is_err() {
            return Err(PipelineError::Cancelled { page: 0 });
        }

        for index in 0..page_count {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { page: index + 1 });
            }
            let source_size = renderer.page_size(index)?;
            let target = RenderTarget::for_page(source_size, scale, max_rendered_pixels);
            let started = Instant::now();
            let image = renderer.render_page(index, target, &cancel)?;
            let event = RenderEvent::Page {
                index,
                image: target.fit(image),
                source_size,
                render_ms: started.elapsed().as_millis() as u64,
            };
            // A closed channel means the job gave up on us.
            if tx.blocking_send(event).is_err() {
                return Err(PipelineError::Cancelled { page: index + 1 });
            }
        }
        Ok(())
    };

    let result = backend.with_document(&pdf, &mut session);
    if let Err(ref e) = result {
        debug!("Render worker stopped: {}", e);
    }
    result
}
