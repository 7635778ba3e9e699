// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::StageKind;

/// Name of the implicit first stage that every pipeline starts from.
pub const EXPORT_STAGE: &str = "export";

/// Top-level configuration exactly as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// data_dir = ".stagehand"
/// keep_releases = 10
///
/// [export.content]
/// cmd = "drush static-export"
///
/// [stage.site]
/// driver = "shell-build"
/// cmd = "hugo -d \"$STAGEHAND_BUILD_DIR\""
///
/// [stage.cdn]
/// driver = "copy-deploy"
/// after = ["site"]
/// target_dir = "/var/www/site"
/// ```
///
/// Use [`ConfigFile`] (via `TryFrom`) for a validated view.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Export jobs from `[export.<name>]`.
    #[serde(default)]
    pub export: BTreeMap<String, ExportConfig>,

    /// Build/deploy stages from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// Validated configuration.
///
/// Can only be constructed through `TryFrom<RawConfigFile>` (or
/// [`crate::config::load_and_validate`]), so holders may assume stage
/// references resolve and the stage graph is acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub export: BTreeMap<String, ExportConfig>,
    pub stage: BTreeMap<String, StageConfig>,
    /// Directory relative paths in the config are resolved against.
    pub root: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        export: BTreeMap<String, ExportConfig>,
        stage: BTreeMap<String, StageConfig>,
    ) -> Self {
        Self {
            pipeline,
            export,
            stage,
            root: PathBuf::from("."),
        }
    }

    /// Re-anchor relative paths at `root` (usually the config file's directory).
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve(&self.pipeline.data_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.resolve(&self.pipeline.export_dir)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Stages whose `after` list names `upstream`. Stages with an empty
    /// `after` list run after [`EXPORT_STAGE`].
    pub fn dependents_of(&self, upstream: &str) -> Vec<&str> {
        self.stage
            .iter()
            .filter(|(_, cfg)| cfg.upstream().any(|u| u == upstream))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Where releases, locks, logs and the export manifest live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Working tree the export jobs write into.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Prefix for lock names (`<run_mode>--<stage>`), e.g. `live` or `preview`.
    #[serde(default = "default_run_mode")]
    pub run_mode: String,

    /// How many releases to keep, and how many to average benchmarks over.
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,

    /// Seconds without a heartbeat after which a running task counts as failed.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".stagehand")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_run_mode() -> String {
    "live".to_string()
}

fn default_keep_releases() -> usize {
    10
}

fn default_staleness_secs() -> u64 {
    300
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            export_dir: default_export_dir(),
            run_mode: default_run_mode(),
            keep_releases: default_keep_releases(),
            staleness_secs: default_staleness_secs(),
        }
    }
}

/// `[export.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Exporter command, run inside the export working tree.
    pub cmd: String,

    /// Globs (relative to the export tree) this job owns for change detection.
    #[serde(default = "default_scope")]
    pub scope: Vec<String>,

    /// Command run only when this job is the last one in its batch.
    #[serde(default)]
    pub finalize_cmd: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_scope() -> Vec<String> {
    vec!["**".to_string()]
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Registry id of the stage implementation (`shell-build`, `shell-deploy`,
    /// `copy-deploy`, ...).
    pub driver: String,

    #[serde(default)]
    pub cmd: Option<String>,

    /// Upstream stages. Empty means "after export".
    #[serde(default)]
    pub after: Vec<String>,

    /// Changed paths that make this stage run. Defaults to everything.
    #[serde(default = "default_trigger")]
    pub trigger: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Run inline even from an interactive request.
    #[serde(default)]
    pub sync: bool,

    /// Lock staleness timeout, also the fallback duration estimate.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Destination for deployers that copy the build output.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_trigger() -> Vec<String> {
    vec!["**".to_string()]
}

fn default_timeout_secs() -> u64 {
    3600
}

impl StageConfig {
    /// Effective upstream stages, with the implicit export dependency filled in.
    pub fn upstream(&self) -> impl Iterator<Item = &str> {
        let implicit = self.after.is_empty().then_some(EXPORT_STAGE);
        implicit
            .into_iter()
            .chain(self.after.iter().map(|s| s.as_str()))
    }

    /// Stage kind implied by the driver id (`*-build` / `*-deploy`).
    pub fn kind(&self) -> Option<StageKind> {
        if self.driver.ends_with("-build") {
            Some(StageKind::Build)
        } else if self.driver.ends_with("-deploy") {
            Some(StageKind::Deploy)
        } else {
            None
        }
    }

    /// Task id used for this stage inside a release, e.g. `build-site`.
    pub fn task_id(&self, name: &str) -> String {
        match self.kind() {
            Some(kind) => format!("{kind}-{name}"),
            None => name.to_string(),
        }
    }
}
