//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::error::{HarvesterError, Result};
use crate::export::{export_all, failure_line, ExportPaths};
use crate::harvester::{CrawlReport, Harvester};
use crate::parser::parse_polling_unit;
use crate::recovery::{is_readable, TextRecoveryEngine};
use crate::types::{ArtifactKind, ParsedFields, RecoveryMethod};

/// Maximum number of ledger lines printed after a crawl.
const SUMMARY_WARD_LINES: usize = 20;

/// Election Harvester - Collect polling-unit result sheets and extract vote tallies.
#[derive(Parser)]
#[command(name = "election-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log progress at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl the results portal and export the result table.
    Crawl(CrawlArgs),

    /// Recover text from a local PDF or image and print the parsed fields.
    Extract {
        /// Result sheet (PDF or image)
        file: PathBuf,
    },

    /// Parse an already-recovered text file and print the fields.
    Parse {
        /// Plain-text file
        text_file: PathBuf,
    },
}

/// Flags for `crawl`; unset flags fall back to `HARVESTER_*` env vars, then defaults.
#[derive(Args, Debug, Default)]
pub struct CrawlArgs {
    /// Page listing the states
    #[arg(long)]
    pub root_url: Option<String>,

    /// Directory for downloaded sheets and exports (default: Election_Results/)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of states crawled in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds to wait for a page's ready marker
    #[arg(long)]
    pub render_timeout_secs: Option<u64>,

    /// Browserless endpoint used to render pages
    #[arg(long)]
    pub browserless_url: Option<String>,
}

impl CrawlArgs {
    /// Apply the flags on top of `config`.
    #[must_use]
    pub fn apply(self, mut config: CrawlConfig) -> CrawlConfig {
        if let Some(root_url) = self.root_url {
            config = config.with_root_url(root_url);
        }
        if let Some(output) = self.output {
            config = config.with_output_dir(output);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(secs) = self.render_timeout_secs {
            config = config.with_render_timeout(Duration::from_secs(secs));
        }
        if let Some(url) = self.browserless_url {
            let token = config.browserless_token.take();
            config = config.with_browserless(url, token);
        }
        config
    }
}

/// JSON printed by `extract`.
#[derive(Debug, Serialize)]
struct ExtractOutput {
    file: PathBuf,
    method: RecoveryMethod,
    readable: bool,
    fields: ParsedFields,
}

/// Run the CLI.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl(args) => crawl_command(args),
        Commands::Extract { file } => extract_command(&file),
        Commands::Parse { text_file } => parse_command(&text_file),
    }
}

/// Execute the crawl command.
fn crawl_command(args: CrawlArgs) -> Result<()> {
    let config = args.apply(CrawlConfig::from_env());
    let harvester = Harvester::from_config(config)?;

    println!(
        "{} {} with {} workers",
        style("Crawling").bold(),
        style(&harvester.config().root_url).cyan(),
        style(harvester.config().workers).green()
    );
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(crawl_with_progress(&harvester))?;

    let paths = export_all(&report, &harvester.config().output_dir)?;
    print_summary(&report, &paths);
    Ok(())
}

async fn crawl_with_progress(harvester: &Harvester) -> Result<CrawlReport> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("shutdown requested, cancelling crawl");
        signal_cancel.cancel();
    });

    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("valid template"),
    );
    pb.set_message("Discovering states...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let aggregator = Arc::clone(harvester.aggregator());
    let ticker_pb = pb.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            interval.tick().await;
            let failures = aggregator.totals().total();
            let rows = aggregator.row_count();
            if rows > 0 || failures > 0 {
                ticker_pb.set_message(format!("{rows} results, {failures} failures"));
            }
        }
    });

    let result = harvester.run(cancel).await;
    ticker.abort();
    pb.finish_and_clear();
    result
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn print_summary(report: &CrawlReport, paths: &ExportPaths) {
    let totals = report.totals();
    let elapsed = report.finished_at - report.started_at;

    if report.cancelled {
        println!("{}", style("Crawl cancelled, partial results kept").yellow().bold());
    } else {
        println!("{}", style("Crawl complete").green().bold());
    }
    println!("  Polling units visited: {}", report.leaves_visited);
    println!("  Results recorded: {}", style(report.rows_recorded).green());
    println!("  Non-document files: {}", style(totals.non_document).yellow());
    println!("  Unreadable documents: {}", style(totals.unreadable).yellow());
    println!("  Failed downloads: {}", style(totals.download_failures).yellow());
    if report.states_failed > 0 {
        println!(
            "  States failed: {}",
            style(report.states_failed).red().bold()
        );
    }
    println!("  Elapsed: {}s", elapsed.num_seconds());

    let failing: Vec<_> = report
        .ledger
        .iter()
        .filter(|entry| entry.counts.total() > 0)
        .collect();
    if !failing.is_empty() {
        println!();
        for entry in failing.iter().take(SUMMARY_WARD_LINES) {
            println!("  {}", failure_line(entry));
        }
        if failing.len() > SUMMARY_WARD_LINES {
            println!("  ... and {} more wards", failing.len() - SUMMARY_WARD_LINES);
        }
    }

    println!();
    println!("{} {}", style("Results:").green().bold(), paths.results.display());
    println!("{} {}", style("Failures:").green().bold(), paths.failures.display());
    println!("{} {}", style("Summary:").green().bold(), paths.summary.display());
}

/// Execute the extract command.
fn extract_command(file: &Path) -> Result<()> {
    let kind = kind_from_path(file)?;
    let engine = TextRecoveryEngine::with_system_tools(Default::default())?;
    let (text, method) = engine.recover_file(kind, file)?;
    let readable = is_readable(&text, engine.policy().min_readable_chars);
    if !readable {
        tracing::warn!(path = %file.display(), "recovered text is below the readability threshold");
    }

    let output = ExtractOutput {
        file: file.to_path_buf(),
        method,
        readable,
        fields: parse_polling_unit(&text),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Execute the parse command.
fn parse_command(text_file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(text_file)?;
    let fields = parse_polling_unit(&text);
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

/// Classify a local file by extension.
fn kind_from_path(path: &Path) -> Result<ArtifactKind> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        return Ok(ArtifactKind::Pdf);
    }
    if image::ImageFormat::from_path(path).is_ok() {
        return Ok(ArtifactKind::Image);
    }
    Err(HarvesterError::Config(format!(
        "{} is neither a PDF nor a supported image",
        path.display()
    )))
}
