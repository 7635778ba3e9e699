// src/release/supervisor.rs

//! Cross-release analytics for progress reporting.
//!
//! Everything here is read-only and cheap enough to be polled by a progress
//! bar.

use std::collections::BTreeMap;

use tracing::debug;

use crate::errors::Result;
use crate::release::{Release, ReleaseStore};
use crate::types::TaskStatus;

/// Snapshot of one task's progress, as shown by `stagehand status`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub release_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub is_started: bool,
    pub is_running: bool,
    pub is_done: bool,
    pub is_failed: bool,
    pub elapsed_seconds: i64,
    pub remaining_seconds: i64,
    pub percentage: u8,
    pub benchmark_seconds: i64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskSupervisor {
    releases: ReleaseStore,
    sample_size: usize,
    default_ceiling: u64,
    ceilings: BTreeMap<String, u64>,
}

impl TaskSupervisor {
    /// `sample_size` is how many recent releases feed the average;
    /// `default_ceiling` (seconds) is the estimate used when no release has
    /// completed the task yet.
    pub fn new(releases: ReleaseStore, sample_size: usize, default_ceiling: u64) -> Self {
        Self {
            releases,
            sample_size: sample_size.max(1),
            default_ceiling,
            ceilings: BTreeMap::new(),
        }
    }

    /// Per-task fallback estimate, normally the stage's lock timeout.
    pub fn with_ceiling(mut self, task_id: impl Into<String>, seconds: u64) -> Self {
        self.ceilings.insert(task_id.into(), seconds);
        self
    }

    fn ceiling_for(&self, task_id: &str) -> u64 {
        self.ceilings
            .get(task_id)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// Mean benchmark of `task_id` over the most recent releases in which it
    /// completed. Falls back to the task's ceiling when there are none.
    pub fn average_task_time(&self, task_id: &str) -> Result<f64> {
        let benchmarks: Vec<i64> = self
            .releases
            .newest_first()?
            .into_iter()
            .take(self.sample_size)
            .map(|release| release.task(task_id))
            .filter(|task| task.is_done())
            .map(|task| task.process_benchmark())
            .collect();

        if benchmarks.is_empty() {
            let ceiling = self.ceiling_for(task_id);
            debug!(task = %task_id, ceiling, "no completed runs; using ceiling");
            return Ok(ceiling as f64);
        }

        let total: i64 = benchmarks.iter().sum();
        Ok(total as f64 / benchmarks.len() as f64)
    }

    /// 100 when done, 0 when failed or not started, otherwise the share of the
    /// average duration already spent, kept within 1..=99.
    pub fn task_percentage(&self, unique_id: &str, task_id: &str) -> Result<u8> {
        let task = self.releases.get(unique_id)?.task(task_id);
        match task.status() {
            TaskStatus::Done => Ok(100),
            TaskStatus::Failed | TaskStatus::Unstarted => Ok(0),
            TaskStatus::Running => {
                let average = self.average_task_time(task_id)?;
                Ok(running_percentage(task.elapsed_seconds(), average))
            }
        }
    }

    /// Estimated seconds left while running; negative once the run overshoots
    /// the average. Zero in every other state.
    pub fn remaining_seconds(&self, unique_id: &str, task_id: &str) -> Result<i64> {
        let task = self.releases.get(unique_id)?.task(task_id);
        if task.status() != TaskStatus::Running {
            return Ok(0);
        }
        let average = self.average_task_time(task_id)?;
        Ok(average.round() as i64 - task.elapsed_seconds())
    }

    /// Newest release whose `task_id` is in `status`.
    ///
    /// For `Running` only the newest release is considered: an older release
    /// cannot legitimately still be running.
    pub fn last_release_by_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Option<Release>> {
        let releases = self.releases.newest_first()?;

        if status == TaskStatus::Running {
            return Ok(releases
                .into_iter()
                .next()
                .filter(|release| release.task(task_id).status() == TaskStatus::Running));
        }

        Ok(releases
            .into_iter()
            .find(|release| release.task(task_id).status() == status))
    }

    pub fn progress(&self, unique_id: &str, task_id: &str) -> Result<TaskProgress> {
        let task = self.releases.get(unique_id)?.task(task_id);
        let status = task.status();

        Ok(TaskProgress {
            release_id: unique_id.to_string(),
            task_id: task_id.to_string(),
            status,
            is_started: task.is_started(),
            is_running: status == TaskStatus::Running,
            is_done: status == TaskStatus::Done,
            is_failed: status == TaskStatus::Failed,
            elapsed_seconds: task.elapsed_seconds(),
            remaining_seconds: self.remaining_seconds(unique_id, task_id)?,
            percentage: self.task_percentage(unique_id, task_id)?,
            benchmark_seconds: task.process_benchmark(),
            failure: task.failure(),
        })
    }
}

/// Percentage for a running task: never 0 (it has started) and never 100
/// (it has not finished).
pub fn running_percentage(elapsed_seconds: i64, average_seconds: f64) -> u8 {
    let ratio = if average_seconds > 0.0 {
        elapsed_seconds.max(0) as f64 / average_seconds * 100.0
    } else {
        100.0
    };
    ratio.round().clamp(1.0, 99.0) as u8
}
