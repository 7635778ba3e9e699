// src/stage/runner.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, EXPORT_STAGE, StageConfig};
use crate::errors::{PipelineError, Result};
use crate::exec::Launcher;
use crate::lock::{LockManager, lock_name};
use crate::release::{Release, ReleaseStore, Task};
use crate::stage::{StageBody, StageContext, StageLog, StageOutcome, Upstream};
use crate::types::{ExecutionContext, StageKind};

/// Static description of a configured stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub task_id: String,
    pub kind: StageKind,
    /// Run inline even from a request context.
    pub sync: bool,
    /// Lock staleness timeout; also the fallback duration estimate.
    pub timeout: Duration,
    pub upstream: Vec<Upstream>,
    pub lock_name: String,
}

impl StageSpec {
    pub fn from_config(name: &str, cfg: &StageConfig, config: &ConfigFile) -> Result<Self> {
        let kind = cfg.kind().ok_or_else(|| PipelineError::UnknownDriver {
            stage: name.to_string(),
            driver: cfg.driver.clone(),
        })?;

        let mut upstream = Vec::new();
        for up in cfg.upstream() {
            let task_id = if up == EXPORT_STAGE {
                EXPORT_STAGE.to_string()
            } else {
                config
                    .stage
                    .get(up)
                    .ok_or_else(|| PipelineError::StageNotFound(up.to_string()))?
                    .task_id(up)
            };
            upstream.push(Upstream {
                stage: up.to_string(),
                task_id,
            });
        }

        Ok(Self {
            name: name.to_string(),
            task_id: cfg.task_id(name),
            kind,
            sync: cfg.sync,
            timeout: Duration::from_secs(cfg.timeout_secs),
            upstream,
            lock_name: lock_name(&config.pipeline.run_mode, name),
        })
    }
}

/// Runs one stage against one release: either inline under the stage lock,
/// or by detaching a child process that does the inline run.
///
/// The inline path, in order:
///
/// 1. take the stage lock, or report [`StageOutcome::Busy`];
/// 2. check that every upstream task is done in the release, then the
///    body's own preconditions;
/// 3. skip when the task is already done and the run is not forced;
/// 4. open the log, mark the task started, run the body with a heartbeat
///    ticker alongside, mark it done.
///
/// Any error after the lock is taken runs the body's rollback. The task is
/// marked failed only if this run got as far as starting it.
pub struct StageRunner {
    spec: StageSpec,
    body: Arc<dyn StageBody>,
    releases: ReleaseStore,
    locks: LockManager,
    launcher: Option<Launcher>,
    context: ExecutionContext,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("spec", &self.spec)
            .field("context", &self.context)
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    pub fn new(
        spec: StageSpec,
        body: Arc<dyn StageBody>,
        releases: ReleaseStore,
        locks: LockManager,
        context: ExecutionContext,
    ) -> Self {
        Self {
            spec,
            body,
            releases,
            locks,
            launcher: None,
            context,
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn spec(&self) -> &StageSpec {
        &self.spec
    }

    /// Background workers never fork again; requests fork unless the stage
    /// asks to run synchronously.
    pub fn is_async(&self) -> bool {
        match self.context {
            ExecutionContext::Background => false,
            ExecutionContext::Request => !self.spec.sync,
        }
    }

    /// Entry point: fork or run depending on [`Self::is_async`].
    pub async fn init(&self, release_id: Option<&str>, force: bool) -> Result<StageOutcome> {
        if self.is_async() {
            self.fork(release_id, force).await
        } else {
            self.run(release_id, force).await
        }
    }

    /// Hand the stage to a detached process. Success only means the launch
    /// worked.
    pub async fn fork(&self, release_id: Option<&str>, force: bool) -> Result<StageOutcome> {
        let launcher = self.launcher.as_ref().ok_or_else(|| {
            PipelineError::ConfigError(format!(
                "stage '{}' must run detached but no launcher is configured",
                self.spec.name
            ))
        })?;
        let release = self.resolve_release(release_id)?;
        launcher
            .launch(&self.spec.name, release.unique_id(), force)
            .await?;
        Ok(StageOutcome::Detached)
    }

    /// Run the stage in this process.
    pub async fn run(&self, release_id: Option<&str>, force: bool) -> Result<StageOutcome> {
        let name = &self.spec.name;

        let Some(guard) = self.locks.try_acquire(&self.spec.lock_name, self.spec.timeout)? else {
            info!(stage = %name, lock = %self.spec.lock_name, "stage already in progress");
            return Ok(StageOutcome::Busy);
        };

        let release = self.resolve_release(release_id)?;
        let task = release.task(&self.spec.task_id);
        let log = Arc::new(Mutex::new(StageLog::new(name.clone())));
        let ctx = StageContext::new(
            name.clone(),
            self.spec.task_id.clone(),
            self.spec.kind,
            release,
            self.spec.upstream.clone(),
            Arc::clone(&log),
        );

        let mut started = false;
        let result = self.run_locked(&ctx, &task, &log, force, &mut started).await;

        let outcome = match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(stage = %name, release = %task.release_id(), error = %err, "stage run failed");
                ctx.log(format!("error: {err}"));
                if let Err(rollback_err) = self.body.rollback(&ctx) {
                    warn!(stage = %name, error = %rollback_err, "rollback failed");
                }

                if started {
                    let reason = err.to_string();
                    task.set_failed(&reason)?;
                    Ok(StageOutcome::Failed(reason))
                } else {
                    Err(err)
                }
            }
        };

        guard.release();
        outcome
    }

    async fn run_locked(
        &self,
        ctx: &StageContext,
        task: &Task,
        log: &Arc<Mutex<StageLog>>,
        force: bool,
        started: &mut bool,
    ) -> Result<StageOutcome> {
        ctx.log(format!(
            "checking preconditions for release {}",
            ctx.release.unique_id()
        ));
        self.check_upstream(&ctx.release)?;
        self.body.check_preconditions(ctx)?;

        if task.is_done() && !force {
            info!(stage = %self.spec.name, release = %ctx.release.unique_id(), "already done; skipping");
            return Ok(StageOutcome::Skipped);
        }

        log.lock().unwrap_or_else(|e| e.into_inner()).open(task)?;
        task.set_started()?;
        *started = true;
        info!(stage = %self.spec.name, release = %ctx.release.unique_id(), task = %task.id(), "stage started");

        let ticker = spawn_heartbeat(task.clone(), self.heartbeat_interval());
        let result = self.body.run(ctx).await;
        ticker.abort();
        let _ = ticker.await;
        result?;

        task.set_done()?;
        ctx.log("done");
        info!(
            stage = %self.spec.name,
            release = %ctx.release.unique_id(),
            seconds = task.process_benchmark(),
            "stage finished"
        );
        Ok(StageOutcome::Success)
    }

    fn check_upstream(&self, release: &Release) -> Result<()> {
        for up in &self.spec.upstream {
            if !release.task(&up.task_id).is_done() {
                return Err(PipelineError::precondition(
                    &self.spec.name,
                    format!(
                        "upstream stage '{}' is not done in release {}",
                        up.stage,
                        release.unique_id()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn resolve_release(&self, release_id: Option<&str>) -> Result<Release> {
        match release_id {
            Some(id) => self.releases.get(id),
            None => self
                .releases
                .current()?
                .ok_or_else(|| PipelineError::ReleaseNotFound("no release exists yet".to_string())),
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        heartbeat_interval_for(self.releases.settings().staleness)
    }
}

/// A third of the staleness window, at least one second.
pub(crate) fn heartbeat_interval_for(staleness: Duration) -> Duration {
    (staleness / 3).max(Duration::from_secs(1))
}

/// Keep `task` looking alive until the handle is aborted.
pub(crate) fn spawn_heartbeat(task: Task, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; set_started already stamped.
        interval.tick().await;
        loop {
            interval.tick().await;
            match task.heartbeat() {
                Ok(()) => debug!(task = %task.id(), "heartbeat"),
                Err(e) => warn!(task = %task.id(), error = %e, "failed to record heartbeat"),
            }
        }
    })
}
