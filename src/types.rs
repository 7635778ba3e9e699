use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the current process is running, which decides whether stages are
/// detached into their own process or run inline.
///
/// - `Request`: an interactive invocation (a hook, an admin action) that must
///   return quickly. Stages without `sync = true` are forked.
/// - `Background`: already a detached or CLI worker; stages always run inline
///   so we never fork twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    #[default]
    Request,
    Background,
}

/// The kind of work a stage performs. Used to derive the task id
/// (`build-<stage>`, `deploy-<stage>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Export,
    Build,
    Deploy,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Export => "export",
            StageKind::Build => "build",
            StageKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Externally observed status of a task, as derived by [`crate::release::Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Unstarted,
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Unstarted => "unstarted",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unstarted" => Ok(TaskStatus::Unstarted),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!(
                "invalid task status: {other} (expected unstarted, running, done or failed)"
            )),
        }
    }
}
