// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod exec;
pub mod export;
pub mod fs;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod release;
pub mod stage;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::clock::SystemClock;
use crate::config::{ConfigFile, load_and_validate};
use crate::exec::Launcher;
use crate::export::{BatchReport, TracingMessenger};
use crate::lock::lock_name;
use crate::pipeline::{Pipeline, StageReport};
use crate::stage::{StageOutcome, StageRegistry};
use crate::types::ExecutionContext;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_and_validate(&args.config)?;

    match args.command {
        Command::Check => {
            print_check(&config);
            Ok(())
        }
        Command::Export { jobs, inline } => {
            let context = if inline {
                ExecutionContext::Background
            } else {
                ExecutionContext::Request
            };
            let pipeline = build_pipeline(&args.config, config, context)?;
            let mut queue = export::queue_from_config(pipeline.config(), &jobs)?;
            if queue.is_empty() {
                bail!("no export jobs configured");
            }
            let report = if inline {
                queue.drain(&pipeline).await?
            } else {
                // Failures were already reported through the messenger.
                match queue.execute(&pipeline, &TracingMessenger).await {
                    Some(report) => report,
                    None => bail!("export failed"),
                }
            };
            print_batch(&report);
            check_reports(&report.stages)
        }
        Command::RunStage {
            stage,
            release,
            force,
        } => {
            let pipeline = build_pipeline(&args.config, config, ExecutionContext::Background)?;
            let reports = pipeline
                .run_stage(&stage, release.as_deref(), force)
                .await?;
            for report in &reports {
                println!("{}: {}", report.stage, describe(&report.outcome));
            }
            check_reports(&reports)
        }
        Command::Status { release } => {
            let pipeline = build_pipeline(&args.config, config, ExecutionContext::Background)?;
            print_status(&pipeline, release.as_deref())
        }
        Command::Prune => {
            let pipeline = build_pipeline(&args.config, config, ExecutionContext::Background)?;
            let keep = pipeline.config().pipeline.keep_releases;
            let removed = pipeline.releases().prune(keep)?;
            info!(removed = removed.len(), keep, "prune complete");
            for id in removed {
                println!("removed {id}");
            }
            Ok(())
        }
    }
}

fn build_pipeline(
    config_path: &Path,
    config: ConfigFile,
    context: ExecutionContext,
) -> Result<Pipeline> {
    let log_dir = config.data_dir().join("logs");
    let launcher = Launcher::for_current_exe(config_path, log_dir)?;
    let pipeline = Pipeline::new(
        config,
        StageRegistry::with_builtin(),
        Arc::new(SystemClock),
        context,
    )?;
    Ok(pipeline.with_launcher(launcher))
}

/// A stage that failed makes the whole command fail.
fn check_reports(reports: &[StageReport]) -> Result<()> {
    for report in reports {
        report.outcome.clone().into_result(&report.stage)?;
    }
    Ok(())
}

fn describe(outcome: &StageOutcome) -> String {
    match outcome {
        StageOutcome::Success => "done".to_string(),
        StageOutcome::Skipped => "already done (use --force to re-run)".to_string(),
        StageOutcome::Busy => "already in progress".to_string(),
        StageOutcome::Detached => "started in the background".to_string(),
        StageOutcome::Failed(reason) => format!("failed: {reason}"),
    }
}

fn print_batch(report: &BatchReport) {
    match (&report.outcome, &report.release_id) {
        (StageOutcome::Busy, _) => println!("another export is in progress"),
        (_, Some(id)) => {
            let changed = report.group.changed_paths();
            println!("release {id}: {} files changed", changed.len());
            for path in changed {
                println!("  {path}");
            }
        }
        _ => println!("nothing changed; no release created"),
    }
    for stage in &report.stages {
        println!("{}: {}", stage.stage, describe(&stage.outcome));
    }
}

/// Print the configuration the way the pipeline sees it.
fn print_check(cfg: &ConfigFile) {
    println!("stagehand check");
    println!("  root = {}", cfg.root.display());
    println!("  pipeline.data_dir = {}", cfg.data_dir().display());
    println!("  pipeline.export_dir = {}", cfg.export_dir().display());
    println!("  pipeline.run_mode = {}", cfg.pipeline.run_mode);
    println!("  pipeline.keep_releases = {}", cfg.pipeline.keep_releases);
    println!("  pipeline.staleness_secs = {}", cfg.pipeline.staleness_secs);
    println!();

    println!("exports ({}):", cfg.export.len());
    for (name, export) in cfg.export.iter() {
        println!("  - {name}");
        println!("      cmd: {}", export.cmd);
        println!("      scope: {:?}", export.scope);
        if let Some(ref finalize) = export.finalize_cmd {
            println!("      finalize_cmd: {finalize}");
        }
    }
    println!();

    println!("stages ({}):", cfg.stage.len());
    for (name, stage) in cfg.stage.iter() {
        println!("  - {name} [{}]", stage.task_id(name));
        println!("      driver: {}", stage.driver);
        if let Some(ref cmd) = stage.cmd {
            println!("      cmd: {cmd}");
        }
        println!("      after: {:?}", stage.upstream().collect::<Vec<_>>());
        println!("      trigger: {:?}", stage.trigger);
        if !stage.exclude.is_empty() {
            println!("      exclude: {:?}", stage.exclude);
        }
        if let Some(ref target) = stage.target_dir {
            println!("      target_dir: {}", cfg.resolve(target).display());
        }
        println!("      sync: {}", stage.sync);
        println!("      timeout_secs: {}", stage.timeout_secs);
        println!(
            "      lock: {}",
            lock_name(&cfg.pipeline.run_mode, name)
        );
    }

    debug!("check complete (no execution)");
}

fn print_status(pipeline: &Pipeline, release_id: Option<&str>) -> Result<()> {
    let release = match release_id {
        Some(id) => pipeline.releases().get(id)?,
        None => match pipeline.releases().current()? {
            Some(release) => release,
            None => {
                println!("no releases yet");
                return Ok(());
            }
        },
    };

    let supervisor = pipeline.supervisor();
    println!("release {}", release.unique_id());
    for task_id in pipeline.task_ids() {
        let progress = supervisor.progress(release.unique_id(), &task_id)?;
        print!(
            "  {:<24} {:<10} {:>3}%  elapsed {}s",
            task_id, progress.status, progress.percentage, progress.elapsed_seconds
        );
        if progress.is_running {
            print!("  remaining ~{}s", progress.remaining_seconds);
        }
        if let Some(failure) = progress.failure {
            print!("  ({failure})");
        }
        println!();
    }
    Ok(())
}
