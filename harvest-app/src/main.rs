use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, JobsCommand, PacingCommand};
use harvest_common::observability::{LogConfig, init_logging};
use harvest_config::{HarvestConfig, HarvestConfigLoader};
use harvest_drivers::harvest_browser::pacing::BackoffSpec;
use harvest_export::{MigrationOutcome, ProfileRecord, WriteMode};
use startup::Harvest;
use std::path::{Path, PathBuf};

mod cli;
mod startup;

const DEFAULT_CONFIG_FILE: &str = "harvest.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Load config (env wins)
    let cfg = load_config(cli.config.as_deref())?;

    // 2) Logging from the loaded config
    let log_path = init_logging(LogConfig {
        app_name: "harvest",
        log_dir: cfg.logging.dir.clone(),
        emit_stderr: cfg.logging.stderr,
        format: cfg.logging.format,
        default_filter: cfg.logging.filter.clone(),
    })?;
    tracing::debug!(log = %log_path.display(), "logging.ready");

    let harvest = Harvest::from_config(cfg);
    match cli.command {
        Command::Startup => startup(&harvest).await,
        Command::Jobs { command } => jobs(&harvest, command).await,
        Command::Export {
            input,
            destination,
            overwrite,
        } => export(&harvest, &input, &destination, overwrite).await,
        Command::Migrate { paths } => migrate(&harvest, &paths).await,
        Command::Pacing {
            command: PacingCommand::Plan { sequence },
        } => {
            let plan = harvest.timing.plan_sequence(sequence, &BackoffSpec::default());
            let total: u128 = plan.iter().map(|d| d.as_millis()).sum();
            println!(
                "{sequence} ({} mode, scale {}):",
                harvest.config.pacing.mode, harvest.config.pacing.scale
            );
            for (step, delay) in plan.iter().enumerate() {
                println!("  {:>2}. {} ms", step + 1, delay.as_millis());
            }
            println!("  total {total} ms");
            println!(
                "list readiness: min {} rows within {} ms, settle {}-{} ms",
                harvest.readiness.min_count,
                harvest.readiness.timeout.as_millis(),
                harvest.readiness.settle_min_ms * harvest.config.pacing.scale,
                harvest.readiness.settle_max_ms * harvest.config.pacing.scale,
            );
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<HarvestConfig> {
    let loader = match explicit {
        Some(path) => HarvestConfigLoader::new().with_file(path, true),
        None => HarvestConfigLoader::new().with_file(DEFAULT_CONFIG_FILE, false),
    };
    loader.load().context("failed to load configuration")
}

async fn startup(harvest: &Harvest) -> Result<()> {
    let report = harvest.start().await?;
    println!("jobs dir:   {}", report.jobs_dir.display());
    println!("export dir: {}", report.export_dir.display());
    println!("loaded:     {}", report.loaded);
    println!("skipped:    {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("  {}: {}", skipped.path.display(), skipped.reason);
    }
    println!("pruned:     {}", report.cleanup.removed.len());
    for (id, reason) in &report.cleanup.failed {
        println!("  could not prune {id}: {reason}");
    }
    Ok(())
}

async fn jobs(harvest: &Harvest, command: JobsCommand) -> Result<()> {
    harvest
        .jobs
        .load()
        .await
        .context("failed to load persisted jobs")?;
    match command {
        JobsCommand::List => {
            for job in harvest.jobs.list().await {
                println!("{}", serde_json::to_string(&job)?);
            }
        }
        JobsCommand::Cleanup { max_age_days } => {
            let days = max_age_days.unwrap_or(harvest.config.jobs.retention_days);
            let report = harvest.jobs.cleanup(days).await;
            for id in &report.removed {
                println!("removed {id}");
            }
            for (id, reason) in &report.failed {
                println!("failed {id}: {reason}");
            }
        }
    }
    Ok(())
}

async fn export(
    harvest: &Harvest,
    input: &Path,
    destination: &Path,
    overwrite: bool,
) -> Result<()> {
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid JSON", input.display(), idx + 1))?;
        let object = value
            .as_object()
            .with_context(|| format!("{}:{}: expected an object", input.display(), idx + 1))?;
        rows.push(ProfileRecord::from_json(object));
    }

    let mode = if overwrite {
        WriteMode::Overwrite
    } else {
        WriteMode::Append
    };
    let written = harvest.exporter.save(&rows, destination, mode).await?;
    println!("wrote {} row(s) to {}", rows.len(), written.display());
    Ok(())
}

async fn migrate(harvest: &Harvest, paths: &[PathBuf]) -> Result<()> {
    let mut results = Vec::new();
    for path in paths {
        if path.is_dir() {
            results.extend(harvest.migrator.migrate_dir(path).await?);
        } else {
            results.push((path.clone(), harvest.migrator.migrate(path).await));
        }
    }

    let mut failures = 0;
    for (path, outcome) in results {
        match outcome {
            Ok(MigrationOutcome::Unchanged) => println!("unchanged {}", path.display()),
            Ok(MigrationOutcome::Migrated {
                backup,
                rows,
                carried_columns,
            }) => {
                println!(
                    "migrated  {} ({rows} rows, backup {})",
                    path.display(),
                    backup.display()
                );
                if !carried_columns.is_empty() {
                    println!("          carried: {}", carried_columns.join(", "));
                }
            }
            Err(err) => {
                failures += 1;
                eprintln!("failed    {}: {err}", path.display());
            }
        }
    }
    anyhow::ensure!(failures == 0, "{failures} file(s) could not be migrated");
    Ok(())
}
