//! CLI binary for squareshot.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `FormatConfig` / `UploadConfig` / `ServerConfig` and prints results.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use squareshot::{
    format_directory, ApiKeyPool, CredentialProvider, CsvLedger, FormatConfig,
    FormatProgressCallback, ImgbbClient, NoRefill, NormalizeOptions, SquareshotError,
    UploadConfig, UploadOrchestrator, UploadProgressCallback,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
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

fn bar_with_prefix(prefix: &'static str, unit: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(&format!(
        "{{spinner:.cyan}} {{prefix:.bold}}  \
         [{{bar:42.green/238}}] {{pos:>4}}/{{len}} {unit}  \
         ⏱ {{elapsed_precise}}  ETA {{eta_precise}}  {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);
    bar.set_style(style);
    bar.set_prefix(prefix);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn shorten(msg: &str) -> String {
    if msg.chars().count() > 80 {
        let cut: String = msg.chars().take(79).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

// ── CLI progress callbacks using indicatif ───────────────────────────────────

/// Live bar for the batch formatter. Files finish out of order, so the bar
/// only counts; failures are printed above it.
struct CliFormatProgress {
    bar: ProgressBar,
}

impl FormatProgressCallback for CliFormatProgress {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Formatting {total_files} images…"))
        ));
    }

    fn on_file_complete(&self, input: &Path, _output: &Path, _done: usize, _total: usize) {
        self.bar.set_message(
            input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        self.bar.inc(1);
    }

    fn on_file_error(&self, input: &Path, error: &str, _done: usize, _total: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            input.display(),
            red(&shorten(error))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_files: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

/// Live bar for uploads, positioned at the resume offset.
struct CliUploadProgress {
    bar: ProgressBar,
    saved: AtomicUsize,
}

impl UploadProgressCallback for CliUploadProgress {
    fn on_run_start(&self, total_files: usize, resumed_from: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.set_position(resumed_from as u64);
        self.bar.reset_eta();
        if resumed_from > 0 {
            self.bar.println(format!(
                "{} Resuming after {} already uploaded",
                cyan("◆"),
                bold(&resumed_from.to_string())
            ));
        }
    }

    fn on_key_start(&self, key_index: usize, chunk_len: usize) {
        self.bar.println(format!(
            "  {} key #{}  {}",
            cyan("→"),
            key_index + 1,
            dim(&format!("{chunk_len} files"))
        ));
    }

    fn on_upload_complete(&self, _path: &Path, _url: &str, _done: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_upload_failed(&self, path: &Path, error: &str, done: usize, total: usize) {
        self.bar.println(format!(
            "  {} [{done}/{total}] {}  {}",
            red("✗"),
            path.display(),
            red(&shorten(error))
        ));
        self.bar.inc(1);
    }

    fn on_flush(&self, rows: usize) {
        let saved = self.saved.fetch_add(rows, Ordering::SeqCst) + rows;
        self.bar.set_message(dim(&format!("{saved} saved")));
    }

    fn on_run_complete(&self, _uploaded: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

// ── Interactive credential refill ────────────────────────────────────────────

/// Asks on the terminal for as many keys as the exhausted pool held.
struct PromptCredentials {
    bar: Option<ProgressBar>,
}

#[async_trait]
impl CredentialProvider for PromptCredentials {
    async fn refill(
        &self,
        exhausted: &ApiKeyPool,
        remaining_files: usize,
    ) -> Result<ApiKeyPool, SquareshotError> {
        let wanted = exhausted.len().max(1);
        let bar = self.bar.clone();
        tokio::task::spawn_blocking(move || match bar {
            Some(bar) => bar.suspend(|| prompt_for_keys(wanted, remaining_files)),
            None => prompt_for_keys(wanted, remaining_files),
        })
        .await
        .map_err(|e| SquareshotError::Internal(format!("prompt task failed: {e}")))?
    }
}

fn prompt_for_keys(wanted: usize, remaining: usize) -> Result<ApiKeyPool, SquareshotError> {
    let io_err = |e: io::Error| SquareshotError::Internal(format!("terminal I/O: {e}"));
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut read_line = || -> Result<Option<String>, SquareshotError> {
        let mut line = String::new();
        let n = input.read_line(&mut line).map_err(io_err)?;
        Ok((n > 0).then(|| line.trim().to_string()))
    };

    eprintln!(
        "{} All API keys are used up and {} files remain.",
        cyan("⚠"),
        bold(&remaining.to_string())
    );
    eprintln!("  Enter {wanted} new API keys.");

    let mut keys = Vec::with_capacity(wanted);
    while keys.len() < wanted {
        eprint!("  key {}/{}: ", keys.len() + 1, wanted);
        io::stderr().flush().map_err(io_err)?;
        match read_line()? {
            None => return Err(SquareshotError::CredentialsRejected),
            Some(key) if key.is_empty() => eprintln!("  {}", red("A key cannot be empty.")),
            Some(key) => keys.push(key),
        }
    }

    eprint!("  Continue with these {wanted} keys? [y/N] ");
    io::stderr().flush().map_err(io_err)?;
    match read_line()? {
        Some(answer) if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") => {
            Ok(ApiKeyPool::new(keys))
        }
        _ => Err(SquareshotError::CredentialsRejected),
    }
}

// ── Command line ─────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Square every photo in a folder, next to the originals
  squareshot format ./photos

  # Into a separate folder, 8 workers, a softer background cut
  squareshot format ./photos -o ./square --workers 8 --threshold 230

  # Upload the results with two keys, 500 images per key
  squareshot upload ./square --api-key KEY1 --api-key KEY2

  # Keys from a file, progress kept in a custom ledger
  squareshot upload ./square --keys-file keys.txt --ledger run1.csv

  # Run the HTTP endpoint
  squareshot serve --bind 127.0.0.1:8000

ENVIRONMENT VARIABLES:
  SQUARESHOT_API_KEYS     Comma-separated upload API keys
  SQUARESHOT_LEDGER       Path of the upload progress ledger
  SQUARESHOT_WORKERS      Formatter worker count
  SQUARESHOT_THRESHOLD    Background luma threshold (0–255)
  RUST_LOG                Overrides the log filter

RESUMING:
  The ledger gets one row per uploaded file. A new run skips as many
  files as the ledger has rows, in sorted directory order. Keep the
  directory unchanged between runs.
"#;

/// Normalise product photos onto square canvases and upload them.
#[derive(Parser, Debug)]
#[command(
    name = "squareshot",
    version,
    about = "Normalise product photos onto square canvases and upload them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SQUARESHOT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SQUARESHOT_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "SQUARESHOT_NO_PROGRESS")]
    no_progress: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long, global = true, env = "SQUARESHOT_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trim, square and resize every image in a directory.
    Format(FormatArgs),
    /// Upload a directory of images with key rotation and resume.
    Upload(UploadArgs),
    /// Serve POST /format_image over HTTP.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct CanvasArgs {
    /// Luma above which a pixel is background (0–255).
    #[arg(long, env = "SQUARESHOT_THRESHOLD", default_value_t = 240)]
    threshold: u8,

    /// Edge length of the square output in pixels.
    #[arg(long, env = "SQUARESHOT_SIZE", default_value_t = 1200,
          value_parser = clap::value_parser!(u32).range(1..=16383))]
    size: u32,

    /// Lossy WebP quality (0–100).
    #[arg(long, env = "SQUARESHOT_QUALITY", default_value_t = 80.0)]
    quality: f32,
}

impl CanvasArgs {
    fn options(&self) -> NormalizeOptions {
        NormalizeOptions {
            final_size: (self.size, self.size),
            threshold: self.threshold,
            webp_quality: self.quality,
        }
    }
}

#[derive(Args, Debug)]
struct FormatArgs {
    /// Directory of source photos (not searched recursively).
    input: PathBuf,

    /// Where formatted files go. Default: the input directory.
    #[arg(short, long, env = "SQUARESHOT_OUTPUT")]
    output: Option<PathBuf>,

    /// Parallel workers. Default: number of CPU cores.
    #[arg(short, long, env = "SQUARESHOT_WORKERS")]
    workers: Option<usize>,

    /// Appended to each file stem.
    #[arg(long, env = "SQUARESHOT_SUFFIX", default_value = "_formatted")]
    suffix: String,

    #[command(flatten)]
    canvas: CanvasArgs,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Directory of images to upload (searched recursively).
    dir: PathBuf,

    /// API key; repeat for several. Also read from SQUARESHOT_API_KEYS.
    #[arg(long = "api-key", env = "SQUARESHOT_API_KEYS", value_delimiter = ',')]
    api_keys: Vec<String>,

    /// File with one API key per line, appended after --api-key values.
    #[arg(long, env = "SQUARESHOT_KEYS_FILE")]
    keys_file: Option<PathBuf>,

    /// Progress ledger (CSV). Created on first flush.
    #[arg(long, env = "SQUARESHOT_LEDGER", default_value = "upload_progress.csv")]
    ledger: PathBuf,

    /// Sub-batches in flight at once.
    #[arg(short, long, env = "SQUARESHOT_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Extra attempts per file after the first failure.
    #[arg(long, env = "SQUARESHOT_RETRY_LIMIT", default_value_t = 3)]
    retry_limit: u32,

    /// Files uploaded with one key before moving to the next.
    #[arg(long, env = "SQUARESHOT_IMAGES_PER_KEY", default_value_t = 500)]
    images_per_key: usize,

    /// Results buffered before each ledger write.
    #[arg(long, env = "SQUARESHOT_SAVE_INTERVAL", default_value_t = 50)]
    save_interval: usize,

    /// Hosted image lifetime in seconds.
    #[arg(long, env = "SQUARESHOT_EXPIRATION", default_value_t = 86_400)]
    expiration: u64,

    /// Upload endpoint.
    #[arg(long, env = "SQUARESHOT_ENDPOINT", default_value = squareshot::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Delay before each retry, in milliseconds.
    #[arg(long, env = "SQUARESHOT_RETRY_BACKOFF_MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Pause between key chunks, in seconds.
    #[arg(long, env = "SQUARESHOT_PAUSE", default_value_t = 0)]
    pause_between_keys: u64,

    /// Per-request timeout in seconds. Default: none.
    #[arg(long, env = "SQUARESHOT_TIMEOUT")]
    timeout: Option<u64>,

    /// Only upload files directly inside DIR.
    #[arg(long)]
    no_recursive: bool,

    /// Write a "failed" ledger row for files that exhaust their retries.
    #[arg(long, env = "SQUARESHOT_RECORD_FAILURES")]
    record_failures: bool,

    /// Stop instead of prompting for new keys when all are used.
    #[arg(long, env = "SQUARESHOT_NO_PROMPT")]
    no_prompt: bool,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "SQUARESHOT_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Largest accepted request body in bytes.
    #[arg(long, env = "SQUARESHOT_MAX_BODY_BYTES", default_value_t = 32 * 1024 * 1024)]
    max_body_bytes: usize,

    #[command(flatten)]
    canvas: CanvasArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar replaces INFO logs; verbose mode always wins.
    let is_serve = !matches!(cli.command, Command::Format(_) | Command::Upload(_));
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !is_serve;
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

    match cli.command {
        Command::Format(ref args) => run_format(&cli, args, show_progress).await,
        Command::Upload(ref args) => run_upload(&cli, args, show_progress).await,
        #[cfg(feature = "server")]
        Command::Serve(ref args) => run_serve(args).await,
    }
}

async fn run_format(cli: &Cli, args: &FormatArgs, show_progress: bool) -> Result<()> {
    let output = args.output.clone().unwrap_or_else(|| args.input.clone());

    let mut builder = FormatConfig::builder()
        .normalize(args.canvas.options())
        .output_suffix(&args.suffix);
    if let Some(n) = args.workers {
        builder = builder.workers(n);
    }
    if show_progress {
        builder = builder.progress_callback(Arc::new(CliFormatProgress {
            bar: bar_with_prefix("Formatting", "images"),
        }));
    }
    let config = builder.build().context("Invalid configuration")?;

    let summary = format_directory(&args.input, &output, &config)
        .await
        .context("Formatting failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        let failed = summary.failed();
        eprintln!(
            "{}  {}/{} images  {}ms  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&summary.succeeded().to_string()),
            summary.total,
            summary.duration_ms,
            bold(&output.display().to_string()),
        );
        if failed > 0 && !show_progress {
            for f in &summary.failures {
                eprintln!("   {} {}", red("✗"), shorten(&f.to_string()));
            }
        }
    }
    Ok(())
}

async fn run_upload(cli: &Cli, args: &UploadArgs, show_progress: bool) -> Result<()> {
    let pool = load_keys(args).await?;
    if pool.is_empty() {
        anyhow::bail!(
            "No API keys given. Pass --api-key, set SQUARESHOT_API_KEYS or use --keys-file."
        );
    }

    let mut builder = UploadConfig::builder()
        .concurrency(args.concurrency)
        .retry_limit(args.retry_limit)
        .images_per_key(args.images_per_key)
        .save_interval(args.save_interval)
        .expiration_secs(args.expiration)
        .endpoint(&args.endpoint)
        .retry_backoff_ms(args.retry_backoff_ms)
        .pause_between_keys_secs(args.pause_between_keys)
        .recursive(!args.no_recursive)
        .record_failures(args.record_failures);
    if let Some(secs) = args.timeout {
        builder = builder.request_timeout_secs(secs);
    }

    let bar = show_progress.then(|| bar_with_prefix("Uploading", "files"));
    if let Some(ref bar) = bar {
        builder = builder.progress_callback(Arc::new(CliUploadProgress {
            bar: bar.clone(),
            saved: AtomicUsize::new(0),
        }));
    }
    let config = builder.build().context("Invalid configuration")?;

    let host = ImgbbClient::new(&config).context("Failed to set up HTTP client")?;
    let credentials: Arc<dyn CredentialProvider> = if args.no_prompt {
        Arc::new(NoRefill)
    } else {
        Arc::new(PromptCredentials { bar: bar.clone() })
    };
    let orchestrator = UploadOrchestrator::new(
        Arc::new(host),
        Arc::new(CsvLedger::new(&args.ledger)),
        credentials,
        config,
    );

    let outcome = tokio::select! {
        res = orchestrator.upload_directory(&args.dir, pool) => res,
        _ = tokio::signal::ctrl_c() => {
            if let Some(ref bar) = bar {
                bar.abandon();
            }
            let saved = orchestrator
                .flush_pending()
                .await
                .context("Interrupted, and buffered results could not be saved")?;
            eprintln!(
                "{} Interrupted. Saved {} buffered results to {}",
                cyan("⚠"),
                saved,
                args.ledger.display()
            );
            std::process::exit(130);
        }
    };

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(ref bar) = bar {
                bar.abandon();
            }
            // Keep whatever the failed run still buffered.
            if let Err(flush_err) = orchestrator.flush_pending().await {
                tracing::error!("Could not save buffered results: {}", flush_err);
            }
            return Err(e).context("Upload run stopped");
        }
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        let failed = summary.failed.len();
        eprintln!(
            "{}  {} uploaded  {} failed  {} skipped  {}ms  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&summary.uploaded.to_string()),
            if failed == 0 {
                dim("0")
            } else {
                red(&failed.to_string())
            },
            summary.resumed_from,
            summary.duration_ms,
            bold(&args.ledger.display().to_string()),
        );
        if failed > 0 && !args.record_failures {
            eprintln!(
                "   {}",
                dim("Failed files have no ledger row and will be tried again next run.")
            );
        }
    }
    Ok(())
}

#[cfg(feature = "server")]
async fn run_serve(args: &ServeArgs) -> Result<()> {
    let config = squareshot::ServerConfig {
        bind: args.bind.clone(),
        max_body_bytes: args.max_body_bytes,
        normalize: args.canvas.options(),
    };
    squareshot::server::serve(config)
        .await
        .context("HTTP server failed")
}

/// `--api-key` / `SQUARESHOT_API_KEYS` first, then `--keys-file` lines.
async fn load_keys(args: &UploadArgs) -> Result<ApiKeyPool> {
    let mut keys = args.api_keys.clone();
    if let Some(ref path) = args.keys_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read keys file {:?}", path))?;
        keys.extend(ApiKeyPool::parse(&text).iter().map(str::to_string));
    }
    Ok(ApiKeyPool::new(keys))
}
