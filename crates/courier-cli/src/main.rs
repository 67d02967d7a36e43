mod commands;
mod logging;
mod progress;

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use commands::{Cli, Commands};
use courier_core::{load_configuration, AppConfig, RunEngine};
use dotenv::dotenv;
use logging::Logging;
use progress::CliReporter;
use tracing::{error, info, warn};

const UNKNOWN_HOST: &str = "UNKNOWN";

fn main() {
    dotenv().ok();
    let args = Cli::parse();

    if let Err(err) = run(args) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let hostname = resolve_hostname(args.hostname.as_deref());
    let config = load_configuration(&args.config, &hostname, args.dry_run)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let logging = Logging::init(&config.log)?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }
    info!(
        "courier starting on host {}{}",
        hostname,
        if config.dry_run { " (dry run)" } else { "" }
    );

    let result = match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run_pipeline(config),
        Commands::Plan => print_plan(config),
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
    };
    if let Err(err) = &result {
        error!("Error: {:#}", err);
    }

    logging.shutdown();
    result
}

fn resolve_hostname(flag: Option<&str>) -> String {
    if let Some(name) = flag.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn run_pipeline(config: AppConfig) -> Result<()> {
    let engine = RunEngine::new(config);
    let reporter = CliReporter::new();
    let report = engine.run(&reporter).context("run aborted")?;

    println!();
    info!(
        "Roots: {}, scanned: {}, selected: {}, moved: {}",
        format!("{}", report.roots_scanned).cyan(),
        format!("{}", report.files_scanned).cyan(),
        format!("{}", report.files_selected).cyan(),
        format!("{}", report.files_moved).green(),
    );
    info!(
        "Archives: {}, delivered: {}, planned: {}, in {}",
        format!("{}", report.archives_built).green(),
        format!("{}", report.uploads_delivered).green(),
        format!("{}", report.uploads_planned).yellow(),
        format!("{:.2}s", report.duration.as_secs_f64()).green(),
    );
    if report.sources_left_behind > 0 {
        warn!(
            "{} source file(s) were copied but could not be deleted",
            format!("{}", report.sources_left_behind).yellow()
        );
    }
    if report.has_failures() {
        warn!(
            "{} failure(s): {} file, {} archive, {} upload",
            format!("{}", report.failures.len()).red(),
            report.files_failed,
            report.archives_failed,
            report.uploads_failed,
        );
        for failure in &report.failures {
            warn!("  {} {}: {}", failure.unit, failure.target, failure.error);
        }
    }
    Ok(())
}

fn print_plan(config: AppConfig) -> Result<()> {
    let engine = RunEngine::new(config);
    let plan = engine.plan().context("planning run")?;

    println!("Policy: {}", plan.policy.describe());
    println!("Scan roots:");
    for root in &plan.roots {
        println!("  {} ({})", root.path.display(), root.label.cyan());
    }
    for batch in &plan.batches {
        println!(
            "{} {} <- {}",
            "Archive".bold(),
            batch.archive_path.display(),
            batch.staging_dir.display()
        );
        if batch.entries.is_empty() {
            println!("  {}", "nothing selected".dimmed());
        }
        for entry in &batch.entries {
            match &entry.backup {
                Some(backup) => println!(
                    "  {} -> {} (backup {})",
                    entry.candidate.path.display(),
                    entry.staging.display(),
                    backup.display()
                ),
                None => println!(
                    "  {} -> {}",
                    entry.candidate.path.display(),
                    entry.staging.display()
                ),
            }
        }
    }
    for failure in &plan.failures {
        println!("  {} {}: {}", "failed".red(), failure.target, failure.error);
    }
    println!(
        "{} file(s) scanned, {} selected",
        plan.files_scanned,
        plan.files_selected()
    );
    Ok(())
}
