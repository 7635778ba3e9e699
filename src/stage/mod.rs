// src/stage/mod.rs

//! Build and deploy stages.
//!
//! - [`runner`] is the locking / state-tracking shell around one stage run.
//! - [`registry`] maps driver ids from the config to stage implementations.
//! - [`drivers`] holds the built-in implementations.
//! - [`log`] is the gated per-run log.

pub mod drivers;
pub mod log;
pub mod registry;
pub mod runner;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::EXPORT_STAGE;
use crate::errors::{PipelineError, Result};
use crate::release::Release;
use crate::types::StageKind;

pub use log::StageLog;
pub use registry::{StageFactory, StageRegistry};
pub use runner::{StageRunner, StageSpec};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a stage invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Ran inline and completed.
    Success,
    /// Already done for this release and not forced.
    Skipped,
    /// Another run holds the stage lock.
    Busy,
    /// Handed to a detached process; poll the task for the result.
    Detached,
    /// Started, failed, rolled back and marked failed.
    Failed(String),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }

    /// Turn `Failed` into an error for callers that must not continue.
    pub fn into_result(self, stage: &str) -> Result<StageOutcome> {
        match self {
            StageOutcome::Failed(reason) => Err(PipelineError::StageFailed {
                stage: stage.to_string(),
                reason,
            }),
            other => Ok(other),
        }
    }
}

/// An upstream stage of the one being run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub stage: String,
    pub task_id: String,
}

/// Everything a stage body needs to do its work.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage: String,
    pub task_id: String,
    pub kind: StageKind,
    pub release: Release,
    pub upstream: Vec<Upstream>,
    log: Arc<Mutex<StageLog>>,
}

impl StageContext {
    pub fn new(
        stage: impl Into<String>,
        task_id: impl Into<String>,
        kind: StageKind,
        release: Release,
        upstream: Vec<Upstream>,
        log: Arc<Mutex<StageLog>>,
    ) -> Self {
        Self {
            stage: stage.into(),
            task_id: task_id.into(),
            kind,
            release,
            upstream,
            log,
        }
    }

    /// Write to the stage log (buffered until the run is confirmed).
    pub fn log(&self, message: impl AsRef<str>) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.log(message.as_ref());
    }

    /// Directory this stage reads its input from: the first upstream build's
    /// output, or the release's export snapshot when it follows export.
    pub fn source_dir(&self) -> PathBuf {
        self.upstream
            .iter()
            .find(|u| u.stage != EXPORT_STAGE)
            .map(|u| self.release.build_dir(&u.stage))
            .unwrap_or_else(|| self.release.export_dir())
    }

    /// Directory this stage writes into (builds) or reads from (deploys).
    pub fn build_dir(&self) -> PathBuf {
        match self.kind {
            StageKind::Build => self.release.build_dir(&self.stage),
            StageKind::Export | StageKind::Deploy => self.source_dir(),
        }
    }

    /// Environment exported to stage commands.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("STAGEHAND_STAGE".to_string(), self.stage.clone());
        env.insert(
            "STAGEHAND_RELEASE_ID".to_string(),
            self.release.unique_id().to_string(),
        );
        env.insert(
            "STAGEHAND_RELEASE_DIR".to_string(),
            self.release.dir().to_string_lossy().into_owned(),
        );
        env.insert(
            "STAGEHAND_EXPORT_DIR".to_string(),
            self.release.export_dir().to_string_lossy().into_owned(),
        );
        env.insert(
            "STAGEHAND_BUILD_DIR".to_string(),
            self.build_dir().to_string_lossy().into_owned(),
        );
        env
    }
}

/// The stage-specific part of a run. The runner owns locking, task state and
/// rollback sequencing; implementations only do the work.
pub trait StageBody: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Checked after the lock is taken and before the task is started.
    /// An error here never marks the task failed.
    fn check_preconditions(&self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StageContext) -> BoxFuture<'a, Result<()>>;

    /// Undo partial work after a failure.
    fn rollback(&self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }
}
