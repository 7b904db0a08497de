//! CLI binary for pdfbatch.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `BatchConfig`, asks for confirmation, wires Ctrl-C to cancellation and
//! prints the final report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfbatch::{
    convert_batch_with, discover, BackendError, BackendKind, BackendPlan, BackendRegistry,
    BatchConfig, BatchProgressCallback, BatchReport, BatchStatistics, CancelFlag,
    ConversionResult, ConversionTask, ExecutionMode, LibraryBackend, OfficeBackend,
    ProgressCallback, TaskStatus,
};
use std::io::{self, BufRead, IsTerminal, Write};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar pinned to the bottom, one log line
/// per finished document above it.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
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

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, mode: ExecutionMode, workers: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("Converting {total} documents…")),
            dim(&format!("mode={mode} workers={workers}")),
        ));
    }

    fn on_task_start(&self, task: &ConversionTask, _total: usize) {
        self.bar.set_message(truncate(&task.name(), 40));
    }

    fn on_backend_failed(&self, task: &ConversionTask, backend: BackendKind, error: &BackendError) {
        self.bar.println(format!(
            "  {} [{}] {} backend failed: {}",
            yellow("↻"),
            task.index,
            backend,
            dim(&truncate(&error.to_string(), 80)),
        ));
    }

    fn on_task_finished(&self, result: &ConversionResult, total: usize) {
        let (mark, detail) = match result.status {
            TaskStatus::Succeeded => (
                green("✓"),
                dim(&format!(
                    "{} {:.1}s",
                    result.backend_used.map(|b| b.label()).unwrap_or("-"),
                    result.duration_ms as f64 / 1000.0
                )),
            ),
            TaskStatus::Skipped => (cyan("↷"), dim("up to date")),
            TaskStatus::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                let last = result
                    .errors()
                    .last()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "failed".into());
                (red("✗"), red(&truncate(&last, 80)))
            }
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            mark,
            result.task.index,
            total,
            result.task.name(),
            detail,
        ));
        self.bar.inc(1);
    }

    fn on_replication_failed(&self, task: &ConversionTask, error: &str) {
        self.bar.println(format!(
            "  {} [{}] mirror copy failed: {}",
            yellow("⚠"),
            task.index,
            dim(&truncate(error, 80)),
        ));
    }

    fn on_batch_complete(&self, stats: &BatchStatistics) {
        self.bar.finish_and_clear();
        let failed = self.failed.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} documents done",
                green("✔"),
                bold(&stats.total.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents done  ({} failed)",
                if failed == stats.total { red("✘") } else { yellow("⚠") },
                bold(&(stats.total - failed).to_string()),
                stats.total,
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}\u{2026}")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every "Anexo 9*.docx" in the current directory
  pdfbatch

  # Another directory and pattern, PDFs into a separate folder
  pdfbatch /srv/salidas --pattern "*.docx" --pdf-dir /srv/pdf

  # Most reliable: one document at a time through the office suite
  pdfbatch /srv/salidas --mode sequential

  # Fast: the standalone converter, four at a time
  pdfbatch /srv/salidas --backends library-first --mode fully-parallel --workers 4

  # Copy every PDF to a shared folder as well
  pdfbatch /srv/salidas --mirror /mnt/share/anexos

  # Just list what would be converted
  pdfbatch /srv/salidas --list

  # Which converters can be found on this machine?
  pdfbatch --check

  # Unattended run with a JSON report and a per-task journal
  pdfbatch /srv/salidas --yes --json --journal logs/anexos.jsonl > report.json

EXECUTION MODES:
  sequential       one worker, documents in order; safest with the office suite
  bounded          (default) documents submitted one at a time to a small pool
  fully-parallel   all documents submitted at once, up to --workers at a time

BACKENDS:
  native    LibreOffice in headless mode, private profile per document
  library   standalone converter, invoked as: <program> {input} {output}
            (change the arguments with --library-arg, repeatable)

ENVIRONMENT VARIABLES:
  PDFBATCH_OFFICE      Path to soffice, skips the PATH lookup
  PDFBATCH_CONVERTER   Path to the standalone converter (docx2pdf)
  RUST_LOG             Override the log filter (e.g. pdfbatch=debug)

EXIT STATUS:
  0  every document converted or already up to date
  1  at least one document failed, or the batch could not start
  130 cancelled with Ctrl-C
"#;

/// Convert a directory of word-processor documents to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "pdfbatch",
    version,
    about = "Batch-convert word-processor documents to PDF",
    long_about = "Convert every document in a directory that matches a pattern to PDF, \
through a headless office suite or a standalone converter, with automatic fallback \
between them. PDFs newer than their source are skipped, so re-runs only convert what \
changed.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the source documents.
    #[arg(default_value = ".", env = "PDFBATCH_SOURCE_DIR")]
    source_dir: PathBuf,

    /// File-name pattern, case-insensitive (e.g. "Anexo 9*.docx").
    #[arg(short, long, env = "PDFBATCH_PATTERN", default_value = pdfbatch::config::DEFAULT_PATTERN)]
    pattern: String,

    /// Write PDFs here instead of next to each source.
    #[arg(long, env = "PDFBATCH_PDF_DIR")]
    pdf_dir: Option<PathBuf>,

    /// How documents are dispatched.
    #[arg(short, long, env = "PDFBATCH_MODE", value_enum, default_value = "bounded")]
    mode: ModeArg,

    /// Worker pool size (1–6).
    #[arg(short, long, env = "PDFBATCH_WORKERS", default_value_t = 2,
          value_parser = clap::value_parser!(u8).range(1..=6))]
    workers: u8,

    /// Which backends to use, in fallback order.
    #[arg(short, long, env = "PDFBATCH_BACKENDS", value_enum, default_value = "native-first")]
    backends: PlanArg,

    /// Copy every PDF to this directory as well.
    #[arg(long, env = "PDFBATCH_MIRROR")]
    mirror: Option<PathBuf>,

    /// Per-attempt timeout in seconds (0 disables).
    #[arg(long, env = "PDFBATCH_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Append one JSON line per finished document to this file.
    #[arg(long, env = "PDFBATCH_JOURNAL")]
    journal: Option<PathBuf>,

    /// Office suite executable (default: search PATH).
    #[arg(long, env = "PDFBATCH_OFFICE")]
    office_program: Option<PathBuf>,

    /// Standalone converter executable (default: search PATH for docx2pdf).
    #[arg(long, env = "PDFBATCH_CONVERTER")]
    library_program: Option<PathBuf>,

    /// Converter argument, repeatable; {input} and {output} are substituted.
    #[arg(long = "library-arg", value_name = "ARG", allow_hyphen_values = true)]
    library_args: Vec<String>,

    /// List matching documents and exit.
    #[arg(short, long)]
    list: bool,

    /// Report which backends are available and exit.
    #[arg(long)]
    check: bool,

    /// Do not ask for confirmation.
    #[arg(short, long, env = "PDFBATCH_YES")]
    yes: bool,

    /// Print the report as JSON on stdout.
    #[arg(long, env = "PDFBATCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFBATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFBATCH_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Sequential,
    FullyParallel,
    Bounded,
}

impl From<ModeArg> for ExecutionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::FullyParallel => ExecutionMode::FullyParallel,
            ModeArg::Bounded => ExecutionMode::BoundedSequentialSubmit,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PlanArg {
    NativeFirst,
    LibraryFirst,
    NativeOnly,
    LibraryOnly,
}

impl From<PlanArg> for BackendPlan {
    fn from(v: PlanArg) -> Self {
        match v {
            PlanArg::NativeFirst => BackendPlan::NativeFirst,
            PlanArg::LibraryFirst => BackendPlan::LibraryFirst,
            PlanArg::NativeOnly => BackendPlan::NativeOnly,
            PlanArg::LibraryOnly => BackendPlan::LibraryOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports every document; library INFO logs
    // would only duplicate it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && io::stderr().is_terminal();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress || cli.json {
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

    // ── Check mode ───────────────────────────────────────────────────────
    if cli.check {
        return run_check(&cli);
    }

    let config = build_config(&cli, None)?;

    // ── List mode ────────────────────────────────────────────────────────
    if cli.list {
        let tasks = discover(&config).context("Failed to list documents")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&tasks).context("Failed to serialise task list")?
            );
        } else {
            for t in &tasks {
                println!("{:>4}  {}", t.index, t.name());
            }
            if !cli.quiet {
                eprintln!("{} document(s) match '{}'", tasks.len(), config.pattern);
            }
        }
        return Ok(());
    }

    // ── Backends ─────────────────────────────────────────────────────────
    let registry = BackendRegistry::detect(&config).context("No usable conversion backend")?;

    // ── Confirmation ─────────────────────────────────────────────────────
    if !cli.yes && !cli.json && io::stdin().is_terminal() {
        let pending = discover(&config).context("Failed to list documents")?;
        if pending.is_empty() {
            eprintln!("No documents match '{}' in {}", config.pattern, config.source_dir.display());
            return Ok(());
        }
        print_plan(&config, &registry, pending.len());
        let confirmed = tokio::task::spawn_blocking(confirm)
            .await
            .context("Confirmation prompt failed")??;
        if !confirmed {
            eprintln!("Cancelled.");
            return Ok(());
        }
    }

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} Cancelling: running converters are being stopped…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Run batch ────────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let report = convert_batch_with(&config, registry, cancel.clone())
        .await
        .context("Batch conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_report(&report);
    }

    if cancel.is_cancelled() {
        std::process::exit(130);
    }
    if report.stats.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .source_dir(&cli.source_dir)
        .pattern(&cli.pattern)
        .mode(cli.mode.into())
        .workers(cli.workers as usize)
        .backend_plan(cli.backends.into())
        .task_timeout_secs(Some(cli.timeout));

    if let Some(ref dir) = cli.pdf_dir {
        builder = builder.pdf_dir(dir);
    }
    if let Some(ref dir) = cli.mirror {
        builder = builder.mirror_dir(dir);
    }
    if let Some(ref path) = cli.journal {
        builder = builder.journal_path(path);
    }
    if let Some(ref path) = cli.office_program {
        builder = builder.office_program(path);
    }
    if let Some(ref path) = cli.library_program {
        builder = builder.library_program(path);
    }
    if !cli.library_args.is_empty() {
        builder = builder.library_args(cli.library_args.iter().cloned());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn run_check(cli: &Cli) -> Result<()> {
    let mut found = 0;
    match OfficeBackend::detect(cli.office_program.as_deref()) {
        Ok(b) => {
            found += 1;
            println!("{} native   {}", green("✓"), b.program().display());
        }
        Err(e) => println!("{} native   {}", red("✗"), e),
    }
    let args = if cli.library_args.is_empty() {
        BatchConfig::default().library_args
    } else {
        cli.library_args.clone()
    };
    match LibraryBackend::detect(cli.library_program.as_deref(), args) {
        Ok(b) => {
            found += 1;
            println!("{} library  {}", green("✓"), b.program().display());
        }
        Err(e) => println!("{} library  {}", red("✗"), e),
    }
    if found == 0 {
        anyhow::bail!("no conversion backend available");
    }
    Ok(())
}

fn print_plan(config: &BatchConfig, registry: &BackendRegistry, pending: usize) {
    let backends: Vec<&str> = registry.kinds().iter().map(|k| k.label()).collect();
    eprintln!("{}", bold("Batch plan"));
    eprintln!("  Source:    {}", config.source_dir.display());
    eprintln!("  Pattern:   {}", config.pattern);
    eprintln!("  Documents: {}", pending);
    eprintln!("  Mode:      {} ({} workers)", config.mode, config.workers);
    eprintln!("  Backends:  {}", backends.join(" → "));
    if let Some(ref dir) = config.mirror_dir {
        eprintln!("  Mirror:    {}", dir.display());
    }
}

fn confirm() -> Result<bool> {
    eprint!("Proceed? [Y/n] ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read answer")?;
    let answer = line.trim().to_lowercase();
    Ok(answer.is_empty() || answer == "y" || answer == "yes" || answer == "s" || answer == "si")
}

fn print_report(report: &BatchReport) {
    let s = &report.stats;
    eprintln!();
    eprintln!("{}", bold("Summary"));
    eprintln!("  Total:       {}", s.total);
    eprintln!("  Converted:   {}", green(&s.succeeded.to_string()));
    eprintln!("  Up to date:  {}", cyan(&s.skipped.to_string()));
    eprintln!(
        "  Failed:      {}",
        if s.failed == 0 { s.failed.to_string() } else { red(&s.failed.to_string()) }
    );
    if s.replicated > 0 {
        eprintln!("  Mirrored:    {}", s.replicated);
    }
    if !s.backend_usage.is_empty() {
        let usage: Vec<String> = s
            .backend_usage
            .iter()
            .map(|(k, n)| format!("{k}={n}"))
            .collect();
        eprintln!("  Backends:    {}", usage.join(", "));
    }
    if let Some(rate) = report.success_rate() {
        eprintln!("  Success:     {:.1}%", rate * 100.0);
    }
    eprintln!(
        "  Elapsed:     {:.1}s  {}",
        report.elapsed_ms as f64 / 1000.0,
        dim(&format!("peak {} open context(s)", report.peak_open_contexts))
    );
    if let Some(tp) = report.throughput_per_minute() {
        eprintln!("  Throughput:  {:.1} docs/min", tp);
    }

    let failures: Vec<&ConversionResult> = report.failures().collect();
    if !failures.is_empty() {
        eprintln!();
        eprintln!("{}", bold("Failed documents"));
        for r in failures {
            eprintln!("  {} {}", red("✗"), r.task.name());
            for e in r.errors() {
                eprintln!("      {}", dim(&truncate(&e.to_string(), 100)));
            }
        }
        eprintln!();
        eprintln!("{}", bold("Recommendations"));
        for hint in report.recommendations() {
            eprintln!("  • {hint}");
        }
    }
}
