use std::collections::BTreeMap;
use std::path::PathBuf;

use stagehand::config::{
    ConfigFile, ExportConfig, PipelineSection, RawConfigFile, StageConfig,
};
use stagehand::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection::default(),
                export: BTreeMap::new(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_export(mut self, name: &str, export: ExportConfig) -> Self {
        self.config.export.insert(name.to_string(), export);
        self
    }

    pub fn with_run_mode(mut self, mode: &str) -> Self {
        self.config.pipeline.run_mode = mode.to_string();
        self
    }

    pub fn with_keep_releases(mut self, keep: usize) -> Self {
        self.config.pipeline.keep_releases = keep;
        self
    }

    pub fn with_staleness_secs(mut self, secs: u64) -> Self {
        self.config.pipeline.staleness_secs = secs;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipeline.data_dir = dir.into();
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipeline.export_dir = dir.into();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(driver: &str) -> Self {
        Self {
            stage: StageConfig {
                driver: driver.to_string(),
                cmd: None,
                after: vec![],
                trigger: vec!["**".to_string()],
                exclude: vec![],
                sync: false,
                timeout_secs: 3600,
                target_dir: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.stage.cmd = Some(cmd.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn trigger(mut self, patterns: &[&str]) -> Self {
        self.stage.trigger = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.stage.exclude.push(pattern.to_string());
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.stage.sync = sync;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.stage.timeout_secs = secs;
        self
    }

    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stage.target_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.stage.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

/// Builder for `ExportConfig`.
pub struct ExportConfigBuilder {
    export: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            export: ExportConfig {
                cmd: cmd.to_string(),
                scope: vec!["**".to_string()],
                finalize_cmd: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn scope(mut self, patterns: &[&str]) -> Self {
        self.export.scope = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn finalize(mut self, cmd: &str) -> Self {
        self.export.finalize_cmd = Some(cmd.to_string());
        self
    }

    pub fn build(self) -> ExportConfig {
        self.export
    }
}
