//! CLI binary for cv-export.
//!
//! A thin shim over the library crate: loads a JSON scene, maps flags to
//! `ExportConfig` / `HttpConfig`, runs one export with the offline
//! `SceneHost` and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use cv_export::{
    ApiClient, Document, ExportConfig, ExportProgressCallback, Exporter, HttpConfig, Orientation,
    PageFormat, ProgressCallback, SceneHost, Selector,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while images are prepared, then a page bar once pagination is
/// known.
struct CliProgressCallback {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Isolating document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }
}

impl ExportProgressCallback for CliProgressCallback {
    fn on_export_start(&self, image_count: usize) {
        self.bar.set_message(format!("{image_count} images to inline"));
    }

    fn on_image_prepared(&self, index: usize, total: usize, inlined: bool) {
        if !inlined {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} image {index}/{total} kept its remote source",
                cyan("⚠")
            ));
        }
        self.bar.set_message(format!("image {index}/{total}"));
    }

    fn on_pages_planned(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Capturing");
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, raster_bytes: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{:>7} KiB", raster_bytes / 1024)),
        ));
        self.bar.inc(1);
    }

    fn on_export_complete(&self, _total_pages: usize) {
        self.bar.finish_and_clear();
    }

    fn on_export_error(&self, error: &str) {
        self.bar.abandon();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Export a scene to cv.pdf
  cv-export cv.json

  # Export only the element with class "cv" to a named file
  cv-export cv.json --root .cv -o out/jane-doe.pdf

  # Inline images through the authenticated API
  cv-export cv.json --api-url https://api.example.com --token "$TOKEN"

  # Machine-readable report
  cv-export cv.json --json > report.json

SCENE FORMAT:
  A nested JSON tree of elements with pre-computed layout frames:
  { "tag": "div", "class": "cv", "frame": { "width": 794, "height": 2400 },
    "children": [ { "tag": "section", "frame": { "y": 300, "height": 800 } } ] }

ENVIRONMENT VARIABLES:
  CV_EXPORT_API_URL   Base URL for relative image sources
  CV_EXPORT_TOKEN     Bearer token sent with image requests
  RUST_LOG            Override the log filter
"#;

/// Export a laid-out CV scene to a paginated PDF.
#[derive(Parser, Debug)]
#[command(
    name = "cv-export",
    version,
    about = "Export a laid-out CV scene to a paginated PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON scene file.
    input: PathBuf,

    /// Output PDF path.
    #[arg(short, long, env = "CV_EXPORT_OUTPUT", default_value = "cv.pdf")]
    output: PathBuf,

    /// Export only the first element matching this selector (`.class` or tag).
    #[arg(long)]
    root: Option<String>,

    /// Base URL that relative image sources are resolved against.
    #[arg(long, env = "CV_EXPORT_API_URL")]
    api_url: Option<String>,

    /// Bearer token for image requests.
    #[arg(long, env = "CV_EXPORT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Image request timeout in seconds.
    #[arg(long, env = "CV_EXPORT_TIMEOUT", default_value_t = HttpConfig::DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Fixed layout width of the exported copy, in pixels.
    #[arg(long, default_value_t = 794)]
    width: u32,

    /// Capture scale factor (0.25–8).
    #[arg(long, default_value_t = 2.0)]
    scale: f32,

    /// Top and bottom page margin in millimetres.
    #[arg(long, default_value_t = 10.0)]
    margin: f32,

    /// Smallest slice, in pixels, a page may end after when a block boundary fits.
    #[arg(long, default_value_t = 50)]
    min_slice: u32,

    /// Page-safe cut selectors; repeat to give several.
    #[arg(long = "cut", value_name = "SELECTOR")]
    cut: Vec<String>,

    /// Paper size.
    #[arg(long, value_enum, default_value = "a4")]
    format: FormatArg,

    /// Landscape pages.
    #[arg(long)]
    landscape: bool,

    /// Print the export report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CV_EXPORT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    A4,
    A5,
    Letter,
}

impl From<FormatArg> for PageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::A4 => PageFormat::A4,
            FormatArg::A5 => PageFormat::A5,
            FormatArg::Letter => PageFormat::LETTER,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Load scene ───────────────────────────────────────────────────────
    let doc = Document::load(&cli.input)
        .with_context(|| format!("Failed to load scene {}", cli.input.display()))?;
    let root = match cli.root.as_deref() {
        Some(sel) => doc
            .find_first(doc.root(), &Selector::parse(sel))
            .with_context(|| format!("No element matches --root {sel}"))?,
        None => doc.root(),
    };

    // ── Build collaborators ──────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExportProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let mut http_config = HttpConfig::default().with_timeout_secs(cli.timeout);
    http_config.base_url = cli.api_url.clone();
    if let Some(ref token) = cli.token {
        http_config = http_config.with_token(token.clone());
    }
    let http = ApiClient::new(http_config).context("Failed to build HTTP client")?;

    let host = Arc::new(SceneHost::new());
    let exporter = Exporter::new(host.clone(), host, Arc::new(http), config);

    // ── Run export ───────────────────────────────────────────────────────
    let output = cli.output.to_string_lossy().into_owned();
    let report = exporter
        .export_document(&doc, root, Some(&output))
        .await
        .context("Export failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        let skipped = report.skipped_images();
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            if skipped == 0 { green("✔") } else { cyan("⚠") },
            bold(&report.pages.to_string()),
            report.duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   {} images inlined  /  {} kept remote  /  {}px at {}px per page",
            dim(&report.inlined_images().to_string()),
            dim(&skipped.to_string()),
            report.total_height,
            report.capacity_px,
        );
    }

    Ok(())
}

/// Map CLI args to `ExportConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExportConfig> {
    let mut builder = ExportConfig::builder()
        .page_width_px(cli.width)
        .page_format(cli.format.into())
        .orientation(if cli.landscape {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        })
        .margin_y_mm(cli.margin)
        .capture_scale(cli.scale)
        .min_slice_px(cli.min_slice)
        .default_filename(cli.output.to_string_lossy());

    if !cli.cut.is_empty() {
        builder = builder.cut_selectors(&cli.cut);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
