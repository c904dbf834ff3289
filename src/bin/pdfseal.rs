//! CLI binary for pdfseal.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one job and writes the result.

use anyhow::{Context, Result};
use clap::Parser;
use pdfseal::{
    flatten, inspect, read_source, seal, watermark, write_atomic, FlattenConfig, ImageQuality,
    JobOutput, PdfiumBackend, PdftoppmBackend, PipelineConfig, PipelineError,
    PipelineProgressCallback, ProgressCallback, RenderBackend, Stage, WatermarkSpec,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while staging and watermarking, a page bar while rendering.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let msg = match stage {
            Stage::Stage => "Reading source…",
            Stage::Watermark => "Applying watermark…",
            Stage::Render => "Opening document…",
            Stage::Assemble => "Assembling pages…",
        };
        self.bar.set_message(msg);
    }

    fn on_render_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn on_page_rendered(&self, page_num: usize, total_pages: usize, width: u32, height: u32) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{width}x{height} px")),
        ));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
        if stage == Stage::Assemble {
            self.bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Watermark for a recipient and flatten (writes report.sealed.pdf)
  pdfseal report.pdf --recipient alice@example.com

  # Custom label text, explicit output
  pdfseal report.pdf --label "Board copy" -o board.pdf

  # From a URL, JPEG pages, smaller raster
  pdfseal https://example.com/a.pdf --recipient bob --quality 80 --scale 1.5

  # Use poppler instead of pdfium
  pdfseal report.pdf --recipient carol --backend pdftoppm

  # Only one stage
  pdfseal report.pdf --recipient dave --watermark-only -o marked.pdf
  pdfseal marked.pdf --flatten-only -o flat.pdf

  # Page sizes and whether every page is already a raster
  pdfseal --inspect-only flat.pdf --json

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory)
  PDFSEAL_*         Fallback for most flags, e.g. PDFSEAL_SCALE=1.5
  RUST_LOG          Overrides the log filter
"#;

/// Watermark PDF files with a confidentiality label and flatten them to images.
#[derive(Parser, Debug)]
#[command(
    name = "pdfseal",
    version,
    about = "Watermark a PDF and flatten every page to a raster image",
    long_about = "Draws \"CONFIDENTIAL - <text>\" diagonally across every page of a PDF, then \
re-renders each page as an image and rebuilds the document from those images, so the label \
cannot be removed by deleting a text or vector layer.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Recipient name; the label text becomes "Shared with: <RECIPIENT>".
    #[arg(long, env = "PDFSEAL_RECIPIENT", conflicts_with = "label")]
    recipient: Option<String>,

    /// Literal label text drawn after "CONFIDENTIAL - ".
    #[arg(long, env = "PDFSEAL_LABEL")]
    label: Option<String>,

    /// Write the result here (default: next to the input, `.sealed.pdf`).
    #[arg(short, long, env = "PDFSEAL_OUTPUT")]
    output: Option<PathBuf>,

    /// Device pixels per point when rendering (0.25–8).
    #[arg(long, env = "PDFSEAL_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Cap on the longest edge of a rendered page, in pixels.
    #[arg(long, env = "PDFSEAL_MAX_PIXELS", default_value_t = 10_000)]
    max_pixels: u32,

    /// Per-page render timeout in milliseconds.
    #[arg(long, env = "PDFSEAL_PAGE_TIMEOUT_MS", default_value_t = 10_000)]
    page_timeout_ms: u64,

    /// Timeout for the backend to open the document, in milliseconds.
    #[arg(long, env = "PDFSEAL_OPEN_TIMEOUT_MS", default_value_t = 60_000)]
    open_timeout_ms: u64,

    /// Page image encoding: "lossless" or a JPEG quality 1–100.
    #[arg(long, env = "PDFSEAL_QUALITY", default_value = "lossless")]
    quality: ImageQuality,

    /// Rendering backend.
    #[arg(long, env = "PDFSEAL_BACKEND", value_enum, default_value = "pdfium")]
    backend: BackendArg,

    /// Path to libpdfium (file or directory) for the pdfium backend.
    #[arg(long, env = "PDFSEAL_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Size output pages like the source pages instead of 1 pt per pixel.
    #[arg(long, env = "PDFSEAL_PRESERVE_PAGE_SIZE")]
    preserve_page_size: bool,

    /// Parent directory for per-job staging directories.
    #[arg(long, env = "PDFSEAL_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Re-run the whole job up to N more times on render/resource failures.
    #[arg(long, env = "PDFSEAL_RETRIES", default_value_t = 0)]
    retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFSEAL_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Only apply the watermark.
    #[arg(long, conflicts_with_all = ["flatten_only", "inspect_only"])]
    watermark_only: bool,

    /// Only flatten (no label needed).
    #[arg(long, conflicts_with = "inspect_only")]
    flatten_only: bool,

    /// Print page sizes and raster detection, nothing else.
    #[arg(long)]
    inspect_only: bool,

    /// Print structured JSON instead of a human summary.
    #[arg(long, env = "PDFSEAL_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFSEAL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFSEAL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFSEAL_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Pdfium,
    Pdftoppm,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let bytes = read_source(&cli.input, &config).await.context("Failed to read PDF")?;
        let info = inspect(&bytes).context("Failed to inspect PDF")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise page info")?
            );
        } else {
            println!("File:         {}", cli.input);
            println!("Pages:        {}", info.page_count);
            println!("PDF Version:  {}", info.pdf_version);
            println!("Flattened:    {}", info.is_flattened());
            for p in &info.pages {
                let kind = match p.image_size {
                    Some((w, h)) => format!("raster {w}x{h} px"),
                    None => "structured".to_string(),
                };
                println!(
                    "  {:>4}  {:>7.1} x {:<7.1} pt  rot {:<3}  {}",
                    p.page_num, p.width, p.height, p.rotation, kind
                );
            }
        }
        return Ok(());
    }

    // ── Flatten-only mode ────────────────────────────────────────────────
    if cli.flatten_only {
        let bytes = read_source(&cli.input, &config).await.context("Failed to read PDF")?;
        let out = flatten(bytes, &config.flatten).await.context("Flatten failed")?;
        let dest = output_path(&cli, "flattened");
        write_atomic(&dest, &out.pdf).await.context("Failed to write output")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&out).context("Failed to serialise output")?);
        } else if !cli.quiet {
            eprintln!(
                "{}  {} pages flattened with {}  →  {}",
                green("✔"),
                out.pages.len(),
                out.backend,
                bold(&dest.display().to_string())
            );
        }
        return Ok(());
    }

    // Caller-side validation: no label, no job.
    let spec = watermark_spec(&cli)?;

    // ── Watermark-only mode ──────────────────────────────────────────────
    if cli.watermark_only {
        let bytes = read_source(&cli.input, &config).await.context("Failed to read PDF")?;
        let marked = watermark(&bytes, &spec).context("Watermark failed")?;
        let dest = output_path(&cli, "watermarked");
        write_atomic(&dest, &marked).await.context("Failed to write output")?;
        if !cli.quiet {
            eprintln!("{}  watermarked  →  {}", green("✔"), bold(&dest.display().to_string()));
        }
        return Ok(());
    }

    // ── Full job ─────────────────────────────────────────────────────────
    let output = seal_with_retries(&cli, &spec, &config).await?;
    let dest = output_path(&cli, "sealed");
    write_atomic(&dest, &output.pdf).await.context("Failed to write output")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} pages  {}ms  ({})  →  {}",
            green("✔"),
            output.stats.page_count,
            output.stats.total_duration_ms,
            output.backend,
            bold(&dest.display().to_string()),
        );
        eprintln!(
            "   {} bytes in  /  {} bytes out",
            dim(&output.stats.source_bytes.to_string()),
            dim(&output.stats.output_bytes.to_string()),
        );
    }

    Ok(())
}

/// Run the job, retrying only failures that can plausibly succeed next time.
async fn seal_with_retries(
    cli: &Cli,
    spec: &WatermarkSpec,
    config: &PipelineConfig,
) -> Result<JobOutput> {
    let mut attempt = 0u32;
    loop {
        match seal(&cli.input, spec, config).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retryable() && attempt < cli.retries => {
                attempt += 1;
                warn!("Attempt {} failed ({}): {}; retrying", attempt, e.kind(), e);
                if !cli.quiet {
                    eprintln!("{} {} error, retrying ({}/{})", red("✗"), e.kind(), attempt, cli.retries);
                }
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
            Err(e) => return Err(describe(e)),
        }
    }
}

fn describe(e: PipelineError) -> anyhow::Error {
    let kind = e.kind();
    anyhow::Error::new(e).context(format!("Job failed ({kind} error)"))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let backend: Arc<dyn RenderBackend> = match cli.backend {
        BackendArg::Pdfium => match cli.pdfium_lib {
            Some(ref path) => Arc::new(PdfiumBackend::with_library_path(path)),
            None => Arc::new(PdfiumBackend::default()),
        },
        BackendArg::Pdftoppm => Arc::new(PdftoppmBackend::default()),
    };

    let mut flatten = FlattenConfig::builder()
        .scale(cli.scale)
        .max_rendered_pixels(cli.max_pixels)
        .page_timeout_ms(cli.page_timeout_ms)
        .open_timeout_ms(cli.open_timeout_ms)
        .quality(cli.quality)
        .preserve_page_size(cli.preserve_page_size)
        .backend(backend);
    if let Some(cb) = progress {
        flatten = flatten.progress_callback(cb);
    }
    let flatten = flatten.build().context("Invalid render configuration")?;

    let mut builder = PipelineConfig::builder()
        .flatten(flatten)
        .download_timeout_secs(cli.download_timeout);
    if let Some(ref dir) = cli.staging_dir {
        builder = builder.staging_dir(dir);
    }
    builder.build().context("Invalid configuration")
}

/// Build the watermark spec from `--recipient` / `--label`.
fn watermark_spec(cli: &Cli) -> Result<WatermarkSpec> {
    let text = match (&cli.recipient, &cli.label) {
        (Some(r), _) => format!("Shared with: {}", r.trim()),
        (None, Some(l)) => l.trim().to_string(),
        (None, None) => anyhow::bail!("a label is required: pass --recipient NAME or --label TEXT"),
    };
    let spec = WatermarkSpec::new(text);
    spec.validate().context("Invalid watermark")?;
    if cli.recipient.as_deref().is_some_and(|r| r.trim().is_empty()) {
        anyhow::bail!("--recipient must not be empty");
    }
    Ok(spec)
}

/// `-o` if given, else `<input stem>.<suffix>.pdf` beside a local input.
fn output_path(cli: &Cli, suffix: &str) -> PathBuf {
    if let Some(ref p) = cli.output {
        return p.clone();
    }
    if cli.input.starts_with("http://") || cli.input.starts_with("https://") {
        let stem = cli
            .input
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".pdf"))
            .filter(|s| !s.is_empty())
            .unwrap_or("document");
        return PathBuf::from(format!("{stem}.{suffix}.pdf"));
    }
    let input = Path::new(&cli.input);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    input.with_file_name(format!("{stem}.{suffix}.pdf"))
}
