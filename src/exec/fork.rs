// src/exec/fork.rs

//! Detaching a stage into its own OS process.
//!
//! The launcher re-invokes the current executable as
//! `stagehand --config <cfg> run-stage <stage> --release <id>` through the
//! shell with output redirected to a per-stage fork log and a trailing `&`.
//! The shell returns as soon as the child is detached, so the caller only
//! learns whether the *launch* worked. The stage's own outcome has to be
//! polled from its task state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::errors::{PipelineError, Result};
use crate::exec::command::CommandRunner;
use crate::release::sanitize_id;

#[derive(Debug, Clone)]
pub struct Launcher {
    program: PathBuf,
    config_path: PathBuf,
    log_dir: PathBuf,
    runner: CommandRunner,
}

impl Launcher {
    pub fn new(
        program: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
            log_dir: log_dir.into(),
            runner: CommandRunner::new(),
        }
    }

    /// Launcher that re-invokes the running binary.
    pub fn for_current_exe(config_path: &Path, log_dir: impl Into<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("resolving current executable")?;
        let config_path = fs::canonicalize(config_path)
            .with_context(|| format!("canonicalizing config path {:?}", config_path))?;
        Ok(Self::new(program, config_path, log_dir))
    }

    pub fn fork_log_path(&self, stage: &str) -> PathBuf {
        self.log_dir.join(format!("fork-{}.log", sanitize_id(stage)))
    }

    /// The full shell line used to detach `stage`.
    pub fn command_line(&self, stage: &str, release_id: &str, force: bool) -> String {
        let mut line = format!(
            "{} --config {} run-stage {} --release {}",
            shell_quote(&self.program.to_string_lossy()),
            shell_quote(&self.config_path.to_string_lossy()),
            shell_quote(stage),
            shell_quote(release_id),
        );
        if force {
            line.push_str(" --force");
        }
        line.push_str(&format!(
            " >> {} 2>&1 &",
            shell_quote(&self.fork_log_path(stage).to_string_lossy())
        ));
        line
    }

    /// Detach `stage` for `release_id`. Any non-zero exit of the launching
    /// shell is a hard failure, reported with its captured output.
    pub async fn launch(&self, stage: &str, release_id: &str, force: bool) -> Result<()> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("creating fork log directory {:?}", self.log_dir))?;

        let line = self.command_line(stage, release_id, force);
        info!(stage = %stage, release = %release_id, cmd = %line, "forking stage");

        let result = self.runner.run(&line, None, &BTreeMap::new(), None).await?;
        if !result.is_success() {
            return Err(PipelineError::Launch {
                command: line,
                code: Some(result.return_code()),
                stdout: result.stdout().to_string(),
                stderr: result.stderr().to_string(),
            });
        }

        Ok(())
    }
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
