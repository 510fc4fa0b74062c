//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use paperpipe_core::{
    BatchDriver, PdfTextConverter, PipelineStats, ProcessOptions, ProcessResult, Processor,
    ProgressReporter, RunMode, RunSummary, collect_stats, format_bytes, load_records,
};
use paperpipe_fetcher::PdfDownloader;
use paperpipe_shared::{
    AppConfig, IndexStats, LoggingConfig, ProcessingStatus, init_config, load_config,
    load_config_from,
};
use paperpipe_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperpipe: research papers in, markdown out.
#[derive(Parser)]
#[command(
    name = "paperpipe",
    version,
    about = "Download paper PDFs and convert them to markdown with metadata headers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.paperpipe/paperpipe.toml).
    #[arg(long, global = true, env = "PAPERPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage root, overriding `storage.base_dir`.
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Input records file, overriding `storage.input_json`.
    #[arg(long, global = true)]
    pub input: Option<PathBuf>,

    /// Records processed at once, overriding `batch.concurrency`.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Reprocess records even when both artifacts already exist.
    #[arg(long, global = true)]
    pub no_skip: bool,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Download and convert every record in the input file.
    Process {
        /// Only process records indexed as failed or pending.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Shorthand for `process --retry-failed`.
    Retry,

    /// Rebuild the papers index from the artifact directories.
    RebuildIndex,

    /// Print index, log, and storage statistics.
    Stats,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Load the config file and apply command-line overrides.
pub(crate) fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(base_dir) = &cli.base_dir {
        config.storage.base_dir = base_dir.clone();
        if cli.input.is_none() {
            config.storage.input_json = base_dir.join("input").join("papers.json");
        }
    }
    if let Some(input) = &cli.input {
        config.storage.input_json = input.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.batch.concurrency = concurrency;
    }
    if cli.no_skip {
        config.conversion.skip_existing = false;
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags and the `[logging]` section.
pub(crate) fn init_tracing(cli: &Cli, logging: Option<&LoggingConfig>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = match cli.verbose {
        0 => logging.map(|l| l.level.as_str()).unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("paperpipe={level}")));

    let text = matches!(cli.log_format, LogFormat::Text).then(|| fmt::layer().with_target(false));
    let json = matches!(cli.log_format, LogFormat::Json).then(|| fmt::layer().json());

    let file = match logging.and_then(|l| l.file.as_deref()) {
        Some(template) => {
            let path = expand_log_path(template);
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .map_err(|e| eyre!("cannot create log directory {}: {e}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| eyre!("cannot open log file {}: {e}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .with(file)
        .init();
    Ok(())
}

/// Replace `{timestamp}` with the local start time.
fn expand_log_path(template: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    PathBuf::from(template.replace("{timestamp}", &stamp))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command. `config` is only required by commands that use it.
pub(crate) async fn run(cli: Cli, config: Result<AppConfig>) -> Result<()> {
    match cli.command {
        Command::Process { retry_failed } => {
            let mode = if retry_failed {
                RunMode::RetryFailed
            } else {
                RunMode::Process
            };
            cmd_process(&config?, mode).await
        }
        Command::Retry => cmd_process(&config?, RunMode::RetryFailed).await,
        Command::RebuildIndex => cmd_rebuild_index(&config?),
        Command::Stats => cmd_stats(&config?),
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(cli.config.as_deref(), force),
            ConfigAction::Show => cmd_config_show(&config?),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_process(config: &AppConfig, mode: RunMode) -> Result<()> {
    let records = load_records(&config.storage.input_json)?;
    let storage = Arc::new(Storage::open(&config.storage.base_dir)?);

    let fetcher = PdfDownloader::new(config.download.clone())?;
    let processor = Processor::new(
        Arc::clone(&storage),
        fetcher,
        PdfTextConverter,
        ProcessOptions::from(&config.conversion),
    );
    let driver = BatchDriver::new(Arc::new(processor), config.batch.concurrency);

    info!(
        input = %config.storage.input_json.display(),
        base_dir = %config.storage.base_dir.display(),
        ?mode,
        "starting run"
    );

    let reporter = CliProgress::new();
    let summary = driver.run(records, mode, &reporter).await?;
    summary.save(&storage)?;

    print_summary(&summary, &storage.summary_path());
    Ok(())
}

fn print_summary(summary: &RunSummary, saved_to: &Path) {
    println!();
    println!("  Run {} finished", summary.run_id);
    println!("  Records:           {}", summary.total_records);
    for status in [
        ProcessingStatus::Completed,
        ProcessingStatus::Skipped,
        ProcessingStatus::FailedDownload,
        ProcessingStatus::FailedConversion,
        ProcessingStatus::Failed,
    ] {
        println!("  {:<18} {}", format!("{}:", status.as_str()), summary.count(status));
    }
    println!("  Time:              {:.1}s", summary.elapsed_seconds);
    println!("  Summary:           {}", saved_to.display());
    println!();
}

fn cmd_rebuild_index(config: &AppConfig) -> Result<()> {
    let storage = Storage::open(&config.storage.base_dir)?;
    let index = storage.rebuild_index()?;

    println!();
    println!("  Index rebuilt: {}", storage.index().path().display());
    print_index_stats(&index.stats);
    if let Some(last) = &index.last_updated {
        println!("  Last updated: {last}");
    }
    println!();
    Ok(())
}

fn cmd_stats(config: &AppConfig) -> Result<()> {
    let storage = Storage::open(&config.storage.base_dir)?;
    let stats = collect_stats(&storage)?;
    print!("{}", render_stats(&stats));
    Ok(())
}

fn print_index_stats(stats: &IndexStats) {
    println!("  Total papers:       {}", stats.total);
    println!("  Completed:          {}", stats.completed);
    println!("  PDFs downloaded:    {}", stats.pdf_downloaded);
    println!("  Markdown generated: {}", stats.markdown_generated);
    println!("  Failed downloads:   {}", stats.failed_download);
    println!("  Failed conversions: {}", stats.failed_conversion);
    println!("  Pending:            {}", stats.pending);
}

fn render_stats(stats: &PipelineStats) -> String {
    use std::fmt::Write;

    let rule = "=".repeat(60);
    let mut out = String::new();
    let index = &stats.index;

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Paper Processing Statistics");
    let _ = writeln!(out, "{rule}");

    let _ = writeln!(out, "\nOverall:");
    let _ = writeln!(out, "  Total papers: {}", index.total);
    let _ = writeln!(
        out,
        "  Completed: {} ({:.1}%)",
        index.completed,
        stats.completion_rate()
    );
    let _ = writeln!(out, "  PDFs downloaded: {}", index.pdf_downloaded);
    let _ = writeln!(out, "  Markdown generated: {}", index.markdown_generated);
    let _ = writeln!(out, "  Failed downloads: {}", index.failed_download);
    let _ = writeln!(out, "  Failed conversions: {}", index.failed_conversion);
    let _ = writeln!(out, "  Pending: {}", index.pending);
    if let Some(last) = &stats.last_updated {
        let _ = writeln!(out, "  Last updated: {last}");
    }

    let _ = writeln!(out, "\nProcessing log:");
    let _ = writeln!(out, "  Total log entries: {}", stats.total_log_entries);

    let _ = writeln!(out, "\nStages:");
    for (stage, data) in &stats.stages {
        let _ = writeln!(out, "  {stage}:");
        let _ = writeln!(out, "    Count: {}", data.attempts);
        let _ = writeln!(out, "    Success rate: {:.1}%", data.success_rate());
        let _ = writeln!(out, "    Average duration: {:.2}s", data.average_duration_seconds());
    }

    let usage = &stats.usage;
    let _ = writeln!(out, "\nStorage:");
    let _ = writeln!(out, "  Paper directories: {}", usage.record_dirs);
    let _ = writeln!(out, "  Total PDF size: {}", format_bytes(usage.pdf_bytes));
    let _ = writeln!(out, "  Total markdown size: {}", format_bytes(usage.markdown_bytes));
    let _ = writeln!(
        out,
        "  Total storage: {}",
        format_bytes(usage.pdf_bytes + usage.markdown_bytes)
    );
    let _ = writeln!(out, "{rule}");
    out
}

fn cmd_config_init(path: Option<&Path>, force: bool) -> Result<()> {
    let target = match path {
        Some(p) => p.to_path_buf(),
        None => paperpipe_shared::config_file_path()?,
    };
    if target.exists() && !force {
        return Err(eyre!(
            "config already exists at {} (use --force to overwrite)",
            target.display()
        ));
    }
    let written = init_config(Some(&target))?;
    println!("Config initialized at: {}", written.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("processing papers");
    }

    fn record_done(&self, result: &ProcessResult, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar
            .set_message(format!("{} {}", result.paper_id, result.status.as_str()));
        if !matches!(
            result.status,
            ProcessingStatus::Completed | ProcessingStatus::Skipped
        ) {
            let reason = result.errors.first().map(String::as_str).unwrap_or("");
            self.bar.println(format!(
                "  ✗ {} [{}] {reason}",
                result.paper_id,
                result.status.as_str()
            ));
        }
    }

    fn finish(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
