// src/release/task.rs

//! Persisted state machine for one stage of one release.
//!
//! Layout inside the release directory:
//!
//! ```text
//! <release_dir>/<task_id>/state.toml
//! <release_dir>/<task_id>/<task_id>.log
//! ```
//!
//! The stored [`TaskState`] is only half the truth: a `running` task whose
//! `heartbeat_at` is older than the staleness window is reported as failed,
//! which is how a process that was killed before it could record its own
//! failure gets noticed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::seconds_between;
use crate::errors::Result;
use crate::release::{TaskSettings, sanitize_id};
use crate::types::TaskStatus;

const STATE_FILE: &str = "state.toml";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stored state. At most one of running/done/failed can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Unstarted,
    Running,
    Done,
    Failed,
}

/// On-disk record of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Task {
    release_id: String,
    task_id: String,
    dir: PathBuf,
    settings: TaskSettings,
}

impl Task {
    pub(crate) fn new(
        release_id: &str,
        release_dir: &Path,
        task_id: &str,
        settings: TaskSettings,
    ) -> Self {
        let dir = release_dir.join(sanitize_id(task_id));
        Self {
            release_id: release_id.to_string(),
            task_id: task_id.to_string(),
            dir,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.task_id
    }

    pub fn release_id(&self) -> &str {
        &self.release_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize_id(&self.task_id)))
    }

    /// Current stored record. A missing file is an unstarted task; an
    /// unreadable one is logged and treated the same way.
    pub fn record(&self) -> TaskRecord {
        let path = self.state_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return TaskRecord::default(),
            Err(e) => {
                warn!(task = %self.task_id, release = %self.release_id, error = %e, "unreadable task state");
                return TaskRecord::default();
            }
        };

        toml::from_str(&contents).unwrap_or_else(|e| {
            warn!(task = %self.task_id, release = %self.release_id, error = %e, "corrupt task state");
            TaskRecord::default()
        })
    }

    pub fn is_started(&self) -> bool {
        self.record().started_at.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.record().state == TaskState::Done
    }

    /// Stored failure, or a running task whose heartbeat went stale.
    pub fn is_failed(&self) -> bool {
        self.failed_in(&self.record())
    }

    pub fn is_running(&self) -> bool {
        let record = self.record();
        record.started_at.is_some()
            && record.state != TaskState::Done
            && !self.failed_in(&record)
    }

    pub fn status(&self) -> TaskStatus {
        let record = self.record();
        if record.state == TaskState::Done {
            TaskStatus::Done
        } else if self.failed_in(&record) {
            TaskStatus::Failed
        } else if record.started_at.is_some() {
            TaskStatus::Running
        } else {
            TaskStatus::Unstarted
        }
    }

    /// Failure reason recorded by `set_failed`, if any.
    pub fn failure(&self) -> Option<String> {
        self.record().failure
    }

    fn failed_in(&self, record: &TaskRecord) -> bool {
        match record.state {
            TaskState::Failed => true,
            TaskState::Running => match record.heartbeat_at {
                Some(beat) => {
                    let silent = seconds_between(beat, self.settings.clock.now());
                    silent > self.settings.staleness.as_secs() as i64
                }
                None => true,
            },
            TaskState::Unstarted | TaskState::Done => false,
        }
    }

    /// Mark the task as running. Clears any previous done/failed state.
    pub fn set_started(&self) -> Result<()> {
        let now = self.settings.clock.now();
        self.write_record(&TaskRecord {
            state: TaskState::Running,
            started_at: Some(now),
            finished_at: None,
            heartbeat_at: Some(now),
            failure: None,
        })?;
        debug!(task = %self.task_id, release = %self.release_id, "task started");
        Ok(())
    }

    /// Mark the task as done. Clears a previous failure.
    pub fn set_done(&self) -> Result<()> {
        let now = self.settings.clock.now();
        let mut record = self.record();
        record.state = TaskState::Done;
        record.finished_at = Some(now);
        record.heartbeat_at = Some(now);
        record.failure = None;
        self.write_record(&record)?;
        debug!(task = %self.task_id, release = %self.release_id, "task done");
        Ok(())
    }

    pub fn set_failed(&self, reason: &str) -> Result<()> {
        let now = self.settings.clock.now();
        let mut record = self.record();
        record.state = TaskState::Failed;
        record.finished_at = Some(now);
        record.failure = Some(reason.to_string());
        self.write_record(&record)?;
        debug!(task = %self.task_id, release = %self.release_id, reason = %reason, "task failed");
        Ok(())
    }

    /// Refresh the liveness timestamp of a running task.
    pub fn heartbeat(&self) -> Result<()> {
        let mut record = self.record();
        if record.state != TaskState::Running {
            return Ok(());
        }
        record.heartbeat_at = Some(self.settings.clock.now());
        self.write_record(&record)
    }

    /// Measured duration in seconds: finished - started when done, 0 when
    /// failed or unstarted, time since start while running.
    pub fn process_benchmark(&self) -> i64 {
        let record = self.record();
        match (record.state, record.started_at) {
            (TaskState::Done, Some(start)) => {
                let end = record.finished_at.unwrap_or(start);
                seconds_between(start, end).max(0)
            }
            (TaskState::Running, Some(start)) if !self.failed_in(&record) => {
                seconds_between(start, self.settings.clock.now()).max(0)
            }
            _ => 0,
        }
    }

    /// Seconds elapsed in the current run (the benchmark once finished).
    pub fn elapsed_seconds(&self) -> i64 {
        self.process_benchmark()
    }

    /// Empty the task log. Each run replaces the previous run's log.
    pub fn truncate_log(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating task dir {:?}", self.dir))?;
        File::create(self.log_path())
            .with_context(|| format!("truncating task log {:?}", self.log_path()))?;
        Ok(())
    }

    /// Append one line to the task log and refresh the heartbeat.
    pub fn append_log(&self, message: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating task dir {:?}", self.dir))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .with_context(|| format!("opening task log {:?}", self.log_path()))?;
        let stamp = self.settings.clock.now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{stamp}] {message}")?;
        self.heartbeat()
    }

    pub fn read_log(&self) -> Result<String> {
        match fs::read_to_string(self.log_path()) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `record` via temp file + rename so readers never see a torn write.
    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating task dir {:?}", self.dir))?;

        let contents = toml::to_string(record)?;
        let tmp = self
            .dir
            .join(format!(
                "{STATE_FILE}.tmp-{}-{}",
                std::process::id(),
                TMP_SEQ.fetch_add(1, Ordering::Relaxed)
            ));
        fs::write(&tmp, contents).with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, self.state_path())
            .with_context(|| format!("replacing {:?}", self.state_path()))?;
        Ok(())
    }
}
