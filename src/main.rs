//! SnapWatch CLI - checkpointed change feed for directory trees
//!
//! Prints one JSON line per change on stdout; logs go to stderr.

use clap::Parser;
use snapwatch::config::{CliArgs, Commands, MonitorConfig, RunArgs};
use snapwatch::core::{stored_summaries, MonitorManager};
use snapwatch::error::{IoResultExt, Result, SnapWatchError};
use snapwatch::sync::GlobalCheckpoint;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Consumer position persisted between runs
const GLOBAL_CHECKPOINT_FILE: &str = "global.checkpoint";

const BATCH_SIZE: usize = 100;
const BATCH_WAIT: Duration = Duration::from_millis(500);

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(args.verbose, args.log_json);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    match &args.command {
        Commands::Run(run) => cmd_run(&args, run),
        Commands::Status => cmd_status(&args),
        Commands::Clean => cmd_clean(&args),
    }
}

fn cmd_run(args: &CliArgs, run: &RunArgs) -> Result<()> {
    let config = MonitorConfig::from_cli(args, run)?;
    let checkpoint_path = config.state_dir.join(GLOBAL_CHECKPOINT_FILE);

    let start_from = if run.full {
        None
    } else if let Some(seq) = run.from_checkpoint {
        Some(GlobalCheckpoint(seq))
    } else {
        load_global_checkpoint(&checkpoint_path)?
    };

    tracing::info!(
        "Monitoring {} roots from {}",
        config.roots.len(),
        start_from
            .map(|g| format!("checkpoint {}", g))
            .unwrap_or_else(|| "scratch".to_string())
    );

    let deadline = run.run_for.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut manager = MonitorManager::new(config)?;
    manager.start(start_from)?;

    let result = consume(&manager, &checkpoint_path, deadline);
    manager.stop();

    for report in manager.status() {
        if let Some(error) = &report.last_error {
            tracing::warn!("{} stopped with: {}", report.root, error);
        }
    }
    result
}

/// Print, persist, then acknowledge each batch
fn consume(
    manager: &MonitorManager,
    checkpoint_path: &Path,
    deadline: Option<Instant>,
) -> Result<()> {
    let queue = manager.queue();
    let stdout = std::io::stdout();
    let mut emitted: u64 = 0;

    while deadline.map_or(true, |d| Instant::now() < d) {
        let batch = queue.next_batch(BATCH_SIZE, BATCH_WAIT);
        let Some(last) = batch.last().map(|c| c.global) else {
            continue;
        };

        let mut out = stdout.lock();
        for change in &batch {
            let line = serde_json::to_string(change)?;
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        drop(out);

        save_global_checkpoint(checkpoint_path, last)?;
        queue.acknowledge(last)?;
        emitted += batch.len() as u64;
    }

    tracing::info!("Emitted {} changes", emitted);
    Ok(())
}

fn cmd_status(args: &CliArgs) -> Result<()> {
    let summaries = stored_summaries(&args.state_dir)?;
    let global = load_global_checkpoint(&args.state_dir.join(GLOBAL_CHECKPOINT_FILE))?;

    if args.log_json {
        let value = serde_json::json!({
            "global_checkpoint": global,
            "monitors": summaries,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("=== SnapWatch Status ===");
    println!("State dir:         {}", args.state_dir.display());
    println!(
        "Global checkpoint: {}",
        global.map(|g| g.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!();

    if summaries.is_empty() {
        println!("No monitors have run yet.");
        return Ok(());
    }

    println!("{:<34} {:>9} {:>9}  {}", "MONITOR", "SNAPSHOTS", "NEWEST", "GUARANTEE");
    for summary in &summaries {
        println!(
            "{:<34} {:>9} {:>9}  {}",
            summary.monitor_name,
            summary.snapshots.len(),
            summary
                .snapshots
                .last()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            summary
                .guarantee
                .as_ref()
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn cmd_clean(args: &CliArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    config.state_dir = args.state_dir.clone();

    MonitorManager::new(config)?.clean()?;

    let checkpoint_path = args.state_dir.join(GLOBAL_CHECKPOINT_FILE);
    if checkpoint_path.exists() {
        std::fs::remove_file(&checkpoint_path).with_path(&checkpoint_path)?;
    }
    println!("Removed SnapWatch state from {}", args.state_dir.display());
    Ok(())
}

fn load_global_checkpoint(path: &Path) -> Result<Option<GlobalCheckpoint>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.parse()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapWatchError::io(path, e)),
    }
}

fn save_global_checkpoint(path: &Path, global: GlobalCheckpoint) -> Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("tmp");
    std::fs::write(&tmp, global.to_string()).with_path(&tmp)?;
    std::fs::rename(&tmp, path).with_path(path)?;
    Ok(())
}
