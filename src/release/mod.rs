// src/release/mod.rs

//! Releases: immutable, timestamped snapshot directories, and the per-stage
//! tasks recorded inside them.
//!
//! - [`task`] is the persisted state machine of one stage in one release.
//! - [`supervisor`] answers cross-release questions (average durations,
//!   progress estimates, "last release where X was done").

pub mod supervisor;
pub mod task;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::errors::{PipelineError, Result};

pub use supervisor::{TaskProgress, TaskSupervisor};
pub use task::{Task, TaskRecord, TaskState};

const CHANGES_FILE: &str = "changes.toml";

static UNSAFE_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static regex is valid"));

/// Make an externally supplied id safe to use as a single path component.
pub fn sanitize_id(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    UNSAFE_ID_CHARS.replace_all(id, "_").into_owned()
}

/// Shared knobs every [`Task`] needs to interpret its state.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub clock: SharedClock,
    /// How long a running task may stay silent before it counts as failed.
    pub staleness: Duration,
}

impl TaskSettings {
    pub fn new(clock: SharedClock, staleness: Duration) -> Self {
        Self { clock, staleness }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChangeSet {
    #[serde(default)]
    paths: Vec<String>,
}

/// One snapshot produced by one export batch.
#[derive(Debug, Clone)]
pub struct Release {
    unique_id: String,
    dir: PathBuf,
    settings: TaskSettings,
}

impl Release {
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Task `task_id` scoped to this release.
    pub fn task(&self, task_id: &str) -> Task {
        Task::new(&self.unique_id, &self.dir, task_id, self.settings.clone())
    }

    /// Snapshot of the export tree taken when the release was produced.
    pub fn export_dir(&self) -> PathBuf {
        self.dir.join("export")
    }

    /// Output directory reserved for the build stage `stage`.
    pub fn build_dir(&self, stage: &str) -> PathBuf {
        self.dir.join("build").join(sanitize_id(stage))
    }

    /// Task ids that have recorded state in this release.
    pub fn task_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("reading release dir {:?}", self.dir))?
        {
            let entry = entry?;
            if entry.path().join("state.toml").is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn has_running_task(&self) -> Result<bool> {
        Ok(self
            .task_ids()?
            .iter()
            .any(|id| self.task(id).is_running()))
    }

    /// Record the relative paths changed by the export that produced this release.
    pub fn write_changes(&self, paths: &[String]) -> Result<()> {
        let set = ChangeSet {
            paths: paths.to_vec(),
        };
        fs::write(self.dir.join(CHANGES_FILE), toml::to_string(&set)?)
            .with_context(|| format!("writing change list for release {}", self.unique_id))?;
        Ok(())
    }

    /// Paths changed by this release's export. Empty if none were recorded.
    pub fn changed_paths(&self) -> Result<Vec<String>> {
        match fs::read_to_string(self.dir.join(CHANGES_FILE)) {
            Ok(contents) => Ok(toml::from_str::<ChangeSet>(&contents)?.paths),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// All releases under `<data_dir>/releases`.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
    settings: TaskSettings,
}

impl ReleaseStore {
    pub fn new(root: impl Into<PathBuf>, settings: TaskSettings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    fn release_at(&self, unique_id: &str) -> Release {
        Release {
            unique_id: unique_id.to_string(),
            dir: self.root.join(unique_id),
            settings: self.settings.clone(),
        }
    }

    /// Create a new, empty release with a fresh unique id.
    ///
    /// Ids are `YYYYMMDDhhmmssSSS` from the clock, with a zero-padded `-NNNN`
    /// suffix when releases land on the same millisecond, so they sort
    /// chronologically.
    pub fn create(&self) -> Result<Release> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating releases dir {:?}", self.root))?;

        let base = self.settings.clock.now().format("%Y%m%d%H%M%S%3f").to_string();
        let mut attempt = 0u32;
        loop {
            let id = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt:04}")
            };
            let release = self.release_at(&id);
            match fs::create_dir(&release.dir) {
                Ok(()) => {
                    info!(release = %id, "created release");
                    return Ok(release);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn get(&self, unique_id: &str) -> Result<Release> {
        if sanitize_id(unique_id) != unique_id {
            return Err(PipelineError::ReleaseNotFound(unique_id.to_string()));
        }
        let release = self.release_at(unique_id);
        if !release.dir.is_dir() {
            return Err(PipelineError::ReleaseNotFound(unique_id.to_string()));
        }
        Ok(release)
    }

    /// All releases, oldest first.
    pub fn list(&self) -> Result<Vec<Release>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();

        Ok(ids.iter().map(|id| self.release_at(id)).collect())
    }

    pub fn newest_first(&self) -> Result<Vec<Release>> {
        let mut releases = self.list()?;
        releases.reverse();
        Ok(releases)
    }

    /// The newest release, if any exists.
    pub fn current(&self) -> Result<Option<Release>> {
        Ok(self.list()?.pop())
    }

    /// Remove a release that turned out to carry nothing worth keeping.
    pub fn discard(&self, release: &Release) -> Result<()> {
        fs::remove_dir_all(&release.dir)
            .with_context(|| format!("removing release {}", release.unique_id))?;
        debug!(release = %release.unique_id, "discarded release");
        Ok(())
    }

    /// Delete all but the newest `keep` releases. Releases with a running task
    /// are kept regardless. Returns the ids that were removed.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let releases = self.newest_first()?;
        let mut removed = Vec::new();

        for release in releases.into_iter().skip(keep) {
            if release.has_running_task()? {
                warn!(release = %release.unique_id, "not pruning release with a running task");
                continue;
            }
            self.discard(&release)?;
            removed.push(release.unique_id.clone());
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), keep, "pruned old releases");
        }
        Ok(removed)
    }
}
