//! CLI binary for edgequake-invoice.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the invoice record.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_invoice::extract::write_json_atomic;
use edgequake_invoice::{
    extract, inspect, ExtractError, ExtractionConfig, ExtractionOutput,
    ExtractionProgressCallback, PageStrategy, ProgressCallback, Stage, DOWNLOAD_FILE_NAME,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Shorten a message to `max` characters for a single terminal line.
fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let head: String = msg.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner showing the current stage, plus one
/// log line per retry and per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the current page, for elapsed reporting.
    page_started: Mutex<Option<Instant>>,
    total: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            total: AtomicUsize::new(0),
        })
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, pages: usize) {
        self.total.store(pages, Ordering::SeqCst);
        self.bar.set_prefix("Extracting");
        if pages > 1 {
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("Extracting {pages} pages one by one…"))
            ));
        }
    }

    fn on_stage_start(&self, page_num: usize, stage: Stage) {
        if stage == Stage::Encode {
            if let Ok(mut t) = self.page_started.lock() {
                *t = Some(Instant::now());
            }
        }
        let total = self.total.load(Ordering::SeqCst);
        if page_num == 0 || total <= 1 {
            self.bar.set_message(stage.label().to_string());
        } else {
            self.bar
                .set_message(format!("page {page_num}/{total}  {}", stage.label()));
        }
    }

    fn on_retry(&self, page_num: usize, attempt: u32, delay_ms: u64, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {} in {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            dim(&format!("{:.1}s", delay_ms as f64 / 1000.0)),
            dim(&truncate(error, 72)),
        ));
    }

    fn on_page_complete(&self, page_num: usize, warnings: usize) {
        let note = match warnings {
            0 => "schema ok".to_string(),
            1 => "1 warning".to_string(),
            n => format!("{n} warnings"),
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {:<12}  {}",
            green("✓"),
            page_num,
            dim(&note),
            dim(&format!("{:.1}s", self.page_elapsed())),
        ));
    }

    fn on_page_error(&self, page_num: usize, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page_num,
            red(&truncate(error, 80)),
            dim(&format!("{:.1}s", self.page_elapsed())),
        ));
    }

    fn on_extraction_complete(&self, pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = pages.saturating_sub(success_count);
        if failed > 0 && success_count > 0 {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                cyan("⚠"),
                bold(&success_count.to_string()),
                pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the first page of a scanned invoice (record on stdout)
  invoice2json invoice.pdf

  # Write the record to a file
  invoice2json invoice.pdf -o records/inv-001.json

  # Write invoice.json in the current directory
  invoice2json invoice.pdf --download

  # Extract every page and merge the records
  invoice2json --pages each multi-page-invoice.pdf

  # Use an edgequake-llm provider instead of Gemini
  invoice2json --provider openai --model gpt-4.1 invoice.pdf

  # Fail when the record deviates from the schema
  invoice2json --strict invoice.pdf

  # Full output (record, warnings, per-page stats)
  invoice2json --json-full invoice.pdf > result.json

  # Inspect PDF metadata (no API key needed)
  invoice2json --inspect-only invoice.pdf

BACKEND SELECTION (first match wins):
  1. --provider gemini|google, or --api-key / GEMINI_API_KEY / GOOGLE_API_KEY
  2. --provider <name>            any edgequake-llm provider
  3. EDGEQUAKE_LLM_PROVIDER       with EDGEQUAKE_MODEL
  4. OPENAI_API_KEY               openai
  5. edgequake-llm auto-detection

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default backend)
  GOOGLE_API_KEY          Alternative name for the Gemini key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory

EXIT STATUS:
  0 on success. Non-zero on any failure; the error kind (decode, inference,
  malformed_response, validation, input, output, config) is printed.
"#;

/// Extract structured data from scanned invoice PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Extract structured JSON from scanned invoice PDFs using Vision LLMs",
    long_about = "Render the first page of an invoice PDF (local file or URL), send it to a \
Vision Language Model together with a fixed invoice schema, and print the decoded record. \
Supports Google Gemini natively and OpenAI, Anthropic, Ollama and other providers through \
edgequake-llm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the record to this file (atomically) instead of stdout.
    #[arg(short, long, env = "INVOICE2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Also write the record as invoice.json in the current directory.
    #[arg(long, env = "INVOICE2JSON_DOWNLOAD")]
    download: bool,

    /// Backend: gemini, or an edgequake-llm provider (openai, anthropic, ollama, …).
    #[arg(long, env = "INVOICE2JSON_PROVIDER")]
    provider: Option<String>,

    /// Model ID (e.g. gemini-2.5-flash, gpt-4.1).
    #[arg(long, env = "INVOICE2JSON_MODEL")]
    model: Option<String>,

    /// Gemini API key. Prefer GEMINI_API_KEY.
    #[arg(long, env = "INVOICE2JSON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "INVOICE2JSON_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages to send: first (default) or each (records are merged).
    #[arg(long, env = "INVOICE2JSON_PAGES", value_enum, default_value = "first")]
    pages: PagesArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOICE2JSON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Retries on transient inference failures.
    #[arg(long, env = "INVOICE2JSON_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt inference timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Do not re-ask the model when its answer is not JSON.
    #[arg(long, env = "INVOICE2JSON_NO_REPROMPT")]
    no_reprompt: bool,

    /// Fail when the record deviates from the schema.
    #[arg(long, env = "INVOICE2JSON_STRICT")]
    strict: bool,

    /// Print the full ExtractionOutput (record, warnings, pages, stats).
    #[arg(long, env = "INVOICE2JSON_JSON_FULL")]
    json_full: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "INVOICE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE2JSON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PagesArg {
    First,
    Each,
}

impl From<PagesArg> for PageStrategy {
    fn from(v: PagesArg) -> Self {
        match v {
            PagesArg::First => PageStrategy::FirstPage,
            PagesArg::Each => PageStrategy::EachPage,
        }
    }
}

/// Attach the error kind so it shows up in the printed chain.
fn with_kind(e: ExtractError, what: &str) -> anyhow::Error {
    let kind = e.kind().as_str();
    anyhow::Error::new(e).context(format!("{what} [{kind}]"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers the user-facing feedback; library INFO logs would
    // only interleave with it.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Ensure PDFium engine is available ───────────────────────────────────
    // First run downloads the library (~30 MB) to
    //   ~/.cache/edgequake-invoice/pdfium-{VERSION}/
    // Later startups only check the path.
    if !pdfium_auto::is_pdfium_cached() {
        if !cli.quiet {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        } else {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        }
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let meta = inspect(&cli.input, &config)
            .await
            .map_err(|e| with_kind(e, "Failed to inspect PDF"))?;

        if cli.json_full {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract(&cli.input, &config)
        .await
        .map_err(|e| with_kind(e, "Extraction failed"))?;

    let mut written: Vec<PathBuf> = Vec::new();
    if let Some(ref path) = cli.output {
        write_artifact(&output, path).await?;
        written.push(path.clone());
    }
    if cli.download {
        let path = Path::new(DOWNLOAD_FILE_NAME);
        write_artifact(&output, path).await?;
        written.push(path.to_path_buf());
    }

    if cli.json_full {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if cli.output.is_none() {
        println!("{}", output.to_pretty_json().context("Failed to serialise record")?);
    }

    if !cli.quiet {
        print_summary(&output, &written);
    }

    Ok(())
}

async fn write_artifact(output: &ExtractionOutput, path: &Path) -> Result<()> {
    write_json_atomic(output, path)
        .await
        .map_err(|e| with_kind(e, &format!("Failed to write {}", path.display())))
}

/// Warnings and a one-line summary on stderr; stdout carries only JSON.
fn print_summary(output: &ExtractionOutput, written: &[PathBuf]) {
    for w in &output.warnings {
        eprintln!("{} {}", yellow("warning:"), w);
    }
    for e in output.page_errors() {
        eprintln!("{} {}", red("page error:"), e);
    }

    let stats = &output.stats;
    let mark = if stats.pages_failed == 0 && output.is_conformant() {
        green("✔")
    } else {
        cyan("⚠")
    };
    let mut line = format!(
        "{}  {}/{} page(s) via {}  {}ms",
        mark, stats.pages_succeeded, stats.pages_sent, stats.backend, stats.total_duration_ms
    );
    if stats.total_retries > 0 {
        line.push_str(&format!("  {} retries", stats.total_retries));
    }
    if stats.reprompted {
        line.push_str("  re-prompted");
    }
    for path in written {
        line.push_str(&format!("  →  {}", bold(&path.display().to_string())));
    }
    eprintln!("{line}");
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
    );
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .page_strategy(cli.pages.clone().into())
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .reprompt_on_malformed(!cli.no_reprompt)
        .strict(cli.strict);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.as_str());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder
        .build()
        .map_err(|e| with_kind(e, "Invalid configuration"))
}
