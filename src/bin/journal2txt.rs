//! CLI binary for journal-transcribe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TranscribeConfig` and prints the combined document.

use anyhow::{Context, Result};
use clap::Parser;
use journal_transcribe::{
    load_batch, write_document, FailurePolicy, ItemStage, OcrBackendKind, Pipeline,
    PipelineMode, ProgressCallback, RetryPolicy, TranscribeConfig, TranscriptionProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
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

/// Live progress bar plus one log line per finished image. Images may
/// finish out of order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TranscriptionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_images: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_images as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Transcribing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Transcribing {total_images} images…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_item_stage(&self, _index: usize, name: &str, stage: ItemStage) {
        self.bar.set_message(format!("{name} ({stage})"));
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, text_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<24}  {:<8}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<24}  {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_progress(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }

    fn on_batch_complete(&self, total_images: usize, success_count: usize) {
        let failed = total_images.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} images transcribed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images transcribed  ({} failed)",
                if failed == total_images {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR + vision review (default), document to stdout
  journal2txt page1.jpg page2.png

  # Write the combined document to a file
  journal2txt scans/*.jpg -o combined_journal.txt

  # Vision model only, then a text-only proofreading pass
  journal2txt --mode direct-self-review page1.jpg

  # Google Vision OCR with no LLM at all
  journal2txt --mode ocr-only --ocr google page1.jpg

  # Four images at a time, stop at the first failure
  journal2txt --concurrency 4 --fail-fast scans/*.png

  # JSON output with per-image results and token counts
  journal2txt --json page1.jpg > result.json

MODES:
  direct              vision LLM transcribes the image
  direct-self-review  vision transcription, then text-only proofread
  ocr-review          OCR draft, then vision LLM corrects it (default)
  ocr-only            OCR text as-is, no LLM
  ocr-cleanup         OCR text, then text-only spelling/punctuation cleanup

ENVIRONMENT VARIABLES (also read from ./.env):
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  AZURE_VISION_ENDPOINT   Azure AI Vision endpoint (ocr modes, --ocr azure)
  AZURE_VISION_KEY        Azure AI Vision key
  GOOGLE_VISION_API_KEY   Google Cloud Vision API key (--ocr google)
  GOOGLE_VISION_ENDPOINT  Override the Cloud Vision annotate URL
"#;

/// Transcribe handwritten journal pages to text with OCR and a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "journal2txt",
    version,
    about = "Transcribe handwritten journal page images to text",
    long_about = "Transcribe photographed handwritten journal pages (JPEG/PNG) into one text \
document. Each page is compressed, read by an OCR service (Azure AI Vision or Google Cloud \
Vision) and/or a vision LLM, and appended as a '# <file name>' section in upload order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JPEG or PNG images, in page order.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Write the document to this file instead of stdout.
    #[arg(short, long, env = "JOURNAL2TXT_OUTPUT")]
    output: Option<PathBuf>,

    /// Which OCR/LLM stages run for each image.
    #[arg(long, env = "JOURNAL2TXT_MODE", value_enum, default_value = "ocr-review")]
    mode: ModeArg,

    /// OCR backend for OCR-based modes.
    #[arg(long, env = "JOURNAL2TXT_OCR", value_enum, default_value = "azure")]
    ocr: OcrArg,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Compressed JPEG size budget in bytes.
    #[arg(long, env = "JOURNAL2TXT_SIZE_BUDGET", default_value_t = 4_000_000)]
    size_budget: usize,

    /// Send the original bytes instead of a re-encoded JPEG.
    #[arg(long)]
    no_compress: bool,

    /// Max LLM output tokens per call.
    #[arg(long, env = "JOURNAL2TXT_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "JOURNAL2TXT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per LLM call on failure.
    #[arg(long, env = "JOURNAL2TXT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Images processed at once.
    #[arg(short, long, env = "JOURNAL2TXT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Stop at the first failed image instead of marking it and continuing.
    #[arg(long)]
    fail_fast: bool,

    /// Path to a text file with a custom vision transcription prompt.
    #[arg(long, env = "JOURNAL2TXT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Wait between OCR status polls, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Wait after an OCR rate-limit answer, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    rate_limit_backoff_ms: u64,

    /// OCR status polls allowed per image.
    #[arg(long, default_value_t = 120)]
    max_polls: u32,

    /// Per-call LLM/OCR HTTP timeout in seconds.
    #[arg(long, env = "JOURNAL2TXT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Output structured JSON (TranscriptionOutput) instead of text.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Direct,
    DirectSelfReview,
    OcrReview,
    OcrOnly,
    OcrCleanup,
}

impl From<ModeArg> for PipelineMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Direct => PipelineMode::DirectTranscribe,
            ModeArg::DirectSelfReview => PipelineMode::DirectTranscribePlusSelfReview,
            ModeArg::OcrReview => PipelineMode::OcrPlusVisionReview,
            ModeArg::OcrOnly => PipelineMode::OcrOnly,
            ModeArg::OcrCleanup => PipelineMode::OcrPlusTextCleanup,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrArg {
    Azure,
    Google,
}

impl From<OcrArg> for OcrBackendKind {
    fn from(v: OcrArg) -> Self {
        match v {
            OcrArg::Azure => OcrBackendKind::Azure,
            OcrArg::Google => OcrBackendKind::Google,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Seed the environment before clap reads env-backed flags.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is on screen.
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

    // ── Build config and pipeline ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn TranscriptionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;
    let images = load_batch(&cli.images)
        .await
        .context("Failed to read images")?;
    let pipeline = Pipeline::from_config(&config).context("Failed to set up pipeline")?;

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let output = pipeline.run(images).await.context("Transcription failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        match cli.output {
            Some(ref path) => write_document(path, &json)?,
            None => println!("{json}"),
        }
    } else if let Some(ref path) = cli.output {
        write_document(path, &output.document)?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} images  {}ms  →  {}",
                if output.stats.failed == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.stats.succeeded,
                output.stats.total_images,
                output.stats.total_duration_ms,
                bold(&path.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.document.as_bytes())
            .context("Failed to write to stdout")?;
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        let failures = output.failures();
        if !failures.is_empty() {
            eprintln!("{}", red(&format!("{} images failed:", failures.len())));
            for (name, reason) in failures {
                eprintln!("  {}  {}", bold(name), reason);
            }
        }
        if !cli.json {
            eprintln!(
                "   {} tokens in  /  {} tokens out  —  {}ms total",
                dim(&output.stats.total_input_tokens.to_string()),
                dim(&output.stats.total_output_tokens.to_string()),
                output.stats.total_duration_ms,
            );
        }
    }

    Ok(())
}

/// Map CLI args to `TranscribeConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TranscribeConfig> {
    let retry_policy = RetryPolicy {
        rate_limit_backoff: Duration::from_millis(cli.rate_limit_backoff_ms),
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        max_polls: cli.max_polls,
        ..RetryPolicy::default()
    };

    let mut builder = TranscribeConfig::builder()
        .mode(cli.mode.into())
        .ocr_backend(cli.ocr.into())
        .compress(!cli.no_compress)
        .size_budget_bytes(cli.size_budget)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .llm_max_retries(cli.max_retries)
        .concurrency(cli.concurrency)
        .retry_policy(retry_policy)
        .api_timeout_secs(cli.api_timeout)
        .failure_policy(if cli.fail_fast {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Continue
        });

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.transcribe_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
