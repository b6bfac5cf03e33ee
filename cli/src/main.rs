//! relocate - Command-line interface for the relocation engine.
//!
//! Builds a plan from a directory walk (or loads one from a JSON file),
//! submits it as a job, and renders live progress from a subscription.
//!
//! Exit codes: 0 when every item succeeded, 1 when the job finished with item
//! errors or was aborted or failed, 2 on usage or validation errors.

use clap::Parser;
use engine::{
    EngineConfig, JobRegistry, JobSnapshot, JobStatus, Layout, OutcomeKind, Plan, PlanBuilder,
    TransferOptions,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// relocate - move files safely, with progress
#[derive(Parser, Debug)]
#[command(name = "relocate")]
#[command(version)]
#[command(about = "Move files into a destination tree, verifying every copy")]
struct Args {
    /// Source directory to walk
    #[arg(long, value_name = "PATH", conflicts_with = "plan")]
    src: Option<PathBuf>,

    /// Destination root
    #[arg(long, value_name = "PATH", conflicts_with = "plan")]
    dst: Option<PathBuf>,

    /// Load the plan from a JSON file instead of walking a directory
    #[arg(long, value_name = "FILE")]
    plan: Option<PathBuf>,

    /// Only move files with these extensions (comma-separated)
    #[arg(long, value_name = "EXT", value_delimiter = ',')]
    ext: Vec<String>,

    /// Destination layout: mirror or flatten
    #[arg(long, value_name = "LAYOUT", default_value = "mirror")]
    layout: String,

    /// Transfer strategy: safe (copy, verify, delete) or rename
    #[arg(long, value_name = "STRATEGY", default_value = "safe")]
    strategy: String,

    /// Report what would be moved without touching the filesystem
    #[arg(long)]
    dry_run: bool,

    /// Label recorded on the job
    #[arg(long, value_name = "LABEL", default_value = "relocate")]
    job_type: String,

    /// Engine configuration file (TOML)
    #[arg(long, value_name = "FILE", env = "RELOCATE_CONFIG")]
    config: Option<PathBuf>,

    /// Checksum algorithm for safe moves: sha256 or blake3
    #[arg(long, value_name = "ALGORITHM")]
    hash: Option<String>,

    /// Print snapshots as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// Renders job snapshots to the terminal
struct CliProgress {
    verbose: bool,
    json: bool,
    start_time: Instant,
    last_progress_update: Option<Instant>,
    reported: usize,
}

impl CliProgress {
    fn new(verbose: bool, json: bool) -> Self {
        CliProgress {
            verbose,
            json,
            start_time: Instant::now(),
            last_progress_update: None,
            reported: 0,
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u8) -> String {
        let percent = percent.min(100) as usize;
        let filled = percent / 5;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn on_planned(&self, plan: &Plan, options: TransferOptions) {
        if self.json {
            return;
        }
        eprintln!("Preparing relocation...");
        eprintln!("  Source: {}", plan.source_root.display());
        if let Some(root) = &plan.destination_root {
            eprintln!("  Destination: {}", root.display());
        }
        let strategy = if options.safe_mode { "safe (copy, verify, delete)" } else { "rename" };
        eprintln!("  Strategy: {}{}", strategy, if options.dry_run { ", dry run" } else { "" });
        match plan.total_size_hint() {
            Some(bytes) => eprintln!("  Total: {} across {} items", Self::format_bytes(bytes), plan.len()),
            None => eprintln!("  Total: {} items", plan.len()),
        }
        eprintln!();
    }

    fn on_snapshot(&mut self, snapshot: &JobSnapshot) {
        if self.json {
            if let Ok(line) = serde_json::to_string(snapshot) {
                println!("{}", line);
            }
            return;
        }

        if self.verbose && snapshot.processed > self.reported {
            if let Some(outcome) = &snapshot.last_outcome {
                let name = outcome
                    .source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("(unknown)");
                eprintln!("\r[{:3}] {}: {} ({})", snapshot.processed, outcome.kind, name, outcome.reason);
            }
        }
        self.reported = snapshot.processed;

        // Throttle progress updates to avoid spam (max once per 200ms)
        if !snapshot.is_terminal() {
            if let Some(last) = self.last_progress_update {
                if last.elapsed().as_millis() < 200 {
                    return;
                }
            }
        }
        self.last_progress_update = Some(Instant::now());

        eprint!(
            "\rProgress: {} | {}/{} items",
            Self::print_progress_bar(snapshot.percent),
            snapshot.processed,
            snapshot.total
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_finished(&self, result: &JobSnapshot) {
        if self.json {
            return;
        }
        eprintln!();
        eprintln!("Job {}: {}", result.status, result.message);

        let summary = &result.summary;
        if result.dry_run {
            eprintln!(
                "Summary: {} would move, {} skipped, {} failed",
                summary.dry_run, summary.skipped, summary.errors
            );
        } else {
            eprintln!(
                "Summary: {} moved, {} skipped, {} failed",
                summary.moved, summary.skipped, summary.errors
            );
        }
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if result.dry_run && self.verbose {
            eprintln!();
            eprintln!("Planned moves:");
            for outcome in result.details.iter().filter(|o| o.kind == OutcomeKind::DryRun) {
                if let Some(destination) = &outcome.destination {
                    eprintln!("  {} -> {}", outcome.source.display(), destination.display());
                }
            }
        }

        if summary.errors > 0 {
            eprintln!();
            eprintln!("Failed files:");
            for outcome in result.details.iter().filter(|o| o.kind == OutcomeKind::Error) {
                eprintln!("  {}: {}", outcome.source.display(), outcome.reason);
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Parse and validate command-line arguments, then run the job
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn load_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };

    if let Some(hash) = &args.hash {
        config.checksum_algorithm = hash.parse()?;
    }
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn parse_options(args: &Args) -> Result<TransferOptions, String> {
    let safe_mode = match args.strategy.to_lowercase().as_str() {
        "safe" => true,
        "rename" => false,
        _ => {
            return Err(format!(
                "Invalid strategy '{}'. Must be 'safe' or 'rename'",
                args.strategy
            ))
        }
    };

    Ok(TransferOptions {
        dry_run: args.dry_run,
        safe_mode,
    })
}

fn load_plan(args: &Args) -> Result<Plan, String> {
    if let Some(path) = &args.plan {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read plan {}: {}", path.display(), e))?;
        return serde_json::from_str(&content)
            .map_err(|e| format!("Invalid plan {}: {}", path.display(), e));
    }

    let (Some(src), Some(dst)) = (&args.src, &args.dst) else {
        return Err("Either --plan or both --src and --dst are required".to_string());
    };

    if !src.exists() {
        return Err(format!("Source directory does not exist: {}", src.display()));
    }
    if !src.is_dir() {
        return Err(format!("Source is not a directory: {}", src.display()));
    }

    let layout: Layout = args.layout.parse()?;
    PlanBuilder::new(src, dst)
        .layout(layout)
        .extensions(&args.ext)
        .build()
        .map_err(|e| format!("Planning failed: {}", e))
}

/// Main CLI logic - separated for testability
///
/// Returns whether the job completed with no item errors.
fn run_cli(args: &Args) -> Result<bool, String> {
    let config = load_config(args)?;
    let options = parse_options(args)?;
    let plan = load_plan(args)?;

    let mut progress = CliProgress::new(args.verbose, args.json);
    progress.on_planned(&plan, options);

    let registry = JobRegistry::new(config);
    let id = registry
        .submit(args.job_type.as_str(), plan, options)
        .map_err(|e| format!("Job submission failed: {}", e))?;

    let subscription = registry
        .subscribe(id)
        .map_err(|e| format!("Failed to follow job: {}", e))?;
    for snapshot in subscription {
        progress.on_snapshot(&snapshot);
    }

    // The subscription may end early if rendering fell behind.
    let result = registry
        .wait(id)
        .ok_or_else(|| format!("Job {} disappeared", id))?;
    progress.on_finished(&result);

    Ok(result.status == JobStatus::Completed && result.summary.errors == 0)
}
