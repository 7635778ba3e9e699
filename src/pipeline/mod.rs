// src/pipeline/mod.rs

//! The configured stage graph and the "stage finished" dispatch.
//!
//! When a stage completes on a release, its direct dependents are
//! considered breadth-first. A dependent is started when
//!
//! - one of the release's changed paths matches its trigger patterns, and
//! - every one of its upstream stages is done on that release.
//!
//! Stages that run inline and succeed feed their own dependents back into
//! the walk. Detached stages continue the walk in their child process.

pub mod trigger;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::{ConfigFile, EXPORT_STAGE};
use crate::errors::{PipelineError, Result};
use crate::exec::Launcher;
use crate::lock::LockManager;
use crate::release::{Release, ReleaseStore, TaskSettings, TaskSupervisor};
use crate::stage::{StageOutcome, StageRegistry, StageRunner, StageSpec};
use crate::types::ExecutionContext;

pub use trigger::StageTrigger;

/// Estimate used for a task that has never completed and has no configured
/// timeout (the export task).
pub const DEFAULT_CEILING_SECS: u64 = 3600;

/// Result of one stage initialisation during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub release_id: String,
    pub outcome: StageOutcome,
}

#[derive(Debug)]
pub struct Pipeline {
    config: Arc<ConfigFile>,
    registry: StageRegistry,
    releases: ReleaseStore,
    locks: LockManager,
    launcher: Option<Launcher>,
    clock: SharedClock,
    context: ExecutionContext,
    triggers: BTreeMap<String, StageTrigger>,
}

impl Pipeline {
    /// Fails if a stage names a driver the registry does not know.
    pub fn new(
        config: ConfigFile,
        registry: StageRegistry,
        clock: SharedClock,
        context: ExecutionContext,
    ) -> Result<Self> {
        let mut triggers = BTreeMap::new();
        for (name, cfg) in &config.stage {
            if !registry.contains(&cfg.driver) {
                return Err(PipelineError::UnknownDriver {
                    stage: name.clone(),
                    driver: cfg.driver.clone(),
                });
            }
            triggers.insert(
                name.clone(),
                StageTrigger::new(name.clone(), &cfg.trigger, &cfg.exclude)?,
            );
        }

        let data_dir = config.data_dir();
        let settings = TaskSettings::new(
            Arc::clone(&clock),
            Duration::from_secs(config.pipeline.staleness_secs),
        );
        let releases = ReleaseStore::new(data_dir.join("releases"), settings);
        let locks = LockManager::new(data_dir.join("locks"), Arc::clone(&clock));

        Ok(Self {
            config: Arc::new(config),
            registry,
            releases,
            locks,
            launcher: None,
            clock,
            context,
            triggers,
        })
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn releases(&self) -> &ReleaseStore {
        &self.releases
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn stage_spec(&self, name: &str) -> Result<StageSpec> {
        let cfg = self
            .config
            .stage
            .get(name)
            .ok_or_else(|| PipelineError::StageNotFound(name.to_string()))?;
        StageSpec::from_config(name, cfg, &self.config)
    }

    pub fn stage_runner(&self, name: &str) -> Result<StageRunner> {
        let cfg = self
            .config
            .stage
            .get(name)
            .ok_or_else(|| PipelineError::StageNotFound(name.to_string()))?;
        let spec = StageSpec::from_config(name, cfg, &self.config)?;
        let body = self.registry.create(name, cfg, &self.config)?;

        let runner = StageRunner::new(
            spec,
            body,
            self.releases.clone(),
            self.locks.clone(),
            self.context,
        );
        Ok(match &self.launcher {
            Some(launcher) => runner.with_launcher(launcher.clone()),
            None => runner,
        })
    }

    /// Progress analytics over this pipeline's releases. Each stage's
    /// timeout doubles as its duration estimate until it has completed once.
    pub fn supervisor(&self) -> TaskSupervisor {
        let mut supervisor = TaskSupervisor::new(
            self.releases.clone(),
            self.config.pipeline.keep_releases,
            DEFAULT_CEILING_SECS,
        );
        for (name, cfg) in &self.config.stage {
            supervisor = supervisor.with_ceiling(cfg.task_id(name), cfg.timeout_secs);
        }
        supervisor
    }

    /// Task ids of the export task and every configured stage, export first
    /// and stages by name.
    pub fn task_ids(&self) -> Vec<String> {
        std::iter::once(EXPORT_STAGE.to_string())
            .chain(
                self.config
                    .stage
                    .iter()
                    .map(|(name, cfg)| cfg.task_id(name)),
            )
            .collect()
    }

    /// Run one stage, and on inline success everything downstream of it.
    pub async fn run_stage(
        &self,
        name: &str,
        release_id: Option<&str>,
        force: bool,
    ) -> Result<Vec<StageReport>> {
        let release = match release_id {
            Some(id) => self.releases.get(id)?,
            None => self
                .releases
                .current()?
                .ok_or_else(|| PipelineError::ReleaseNotFound("no release exists yet".to_string()))?,
        };

        let runner = self.stage_runner(name)?;
        let outcome = runner.init(Some(release.unique_id()), force).await?;
        let succeeded = outcome.is_success();

        let mut reports = vec![StageReport {
            stage: name.to_string(),
            release_id: release.unique_id().to_string(),
            outcome,
        }];
        if succeeded {
            reports.extend(self.on_stage_finished(name, &release).await?);
        }
        Ok(reports)
    }

    /// Start the dependents of `upstream` on `release`, breadth-first.
    pub async fn on_stage_finished(
        &self,
        upstream: &str,
        release: &Release,
    ) -> Result<Vec<StageReport>> {
        let changed = release.changed_paths()?;
        let mut reports = Vec::new();
        let mut dispatched = BTreeSet::new();
        let mut queue = VecDeque::from([upstream.to_string()]);

        while let Some(finished) = queue.pop_front() {
            for dependent in self.config.dependents_of(&finished) {
                if dispatched.contains(dependent) {
                    continue;
                }

                let matched = self
                    .triggers
                    .get(dependent)
                    .is_some_and(|t| t.matches_any(&changed));
                if !matched {
                    debug!(
                        stage = %dependent,
                        release = %release.unique_id(),
                        "no changed path matches trigger; not starting"
                    );
                    continue;
                }

                let spec = self.stage_spec(dependent)?;
                let waiting = spec
                    .upstream
                    .iter()
                    .find(|u| !release.task(&u.task_id).is_done());
                if let Some(waiting) = waiting {
                    debug!(
                        stage = %dependent,
                        waiting_for = %waiting.stage,
                        "not all upstream stages are done yet"
                    );
                    continue;
                }

                dispatched.insert(dependent.to_string());
                info!(stage = %dependent, after = %finished, release = %release.unique_id(), "starting downstream stage");

                let runner = self.stage_runner(dependent)?;
                let outcome = runner.init(Some(release.unique_id()), false).await?;
                if outcome.is_success() {
                    queue.push_back(dependent.to_string());
                }
                reports.push(StageReport {
                    stage: dependent.to_string(),
                    release_id: release.unique_id().to_string(),
                    outcome,
                });
            }
        }

        Ok(reports)
    }
}
