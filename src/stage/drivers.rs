// src/stage/drivers.rs

//! Built-in stage drivers.
//!
//! - `shell-build`: run a command that turns the export snapshot into a site
//!   under `$STAGEHAND_BUILD_DIR`.
//! - `shell-deploy`: run a command that ships `$STAGEHAND_BUILD_DIR`.
//! - `copy-deploy`: mirror the upstream build output into a directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::config::{ConfigFile, StageConfig};
use crate::errors::{PipelineError, Result};
use crate::exec::{CliCommandResult, CommandRunner};
use crate::fs::copy_tree;
use crate::stage::{BoxFuture, StageBody, StageContext};
use crate::types::StageKind;

fn required_cmd(name: &str, cfg: &StageConfig) -> Result<String> {
    cfg.cmd
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::ConfigError(format!(
                "stage '{}' uses driver '{}' and requires `cmd`",
                name, cfg.driver
            ))
        })
}

/// Run `cmd` in the release directory and copy its output into the stage log.
async fn run_stage_command(
    ctx: &StageContext,
    cmd: &str,
    extra_env: &BTreeMap<String, String>,
) -> Result<CliCommandResult> {
    let mut env = ctx.env();
    env.extend(extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    ctx.log(format!("running: {cmd}"));
    let result = CommandRunner::new()
        .run(cmd, Some(ctx.release.dir()), &env, None)
        .await?;

    for line in result.stdout().lines() {
        ctx.log(format!("stdout: {line}"));
    }
    for line in result.stderr().lines() {
        ctx.log(format!("stderr: {line}"));
    }

    if !result.is_success() {
        return Err(PipelineError::StageFailed {
            stage: ctx.stage.clone(),
            reason: format!(
                "command exited with code {}: {}",
                result.return_code(),
                result.stderr().trim()
            ),
        });
    }

    Ok(result)
}

#[derive(Debug, Clone)]
pub struct ShellBuilder {
    cmd: String,
    env: BTreeMap<String, String>,
}

impl ShellBuilder {
    pub fn from_config(name: &str, cfg: &StageConfig) -> Result<Self> {
        Ok(Self {
            cmd: required_cmd(name, cfg)?,
            env: cfg.env.clone(),
        })
    }
}

impl StageBody for ShellBuilder {
    fn kind(&self) -> StageKind {
        StageKind::Build
    }

    fn check_preconditions(&self, ctx: &StageContext) -> Result<()> {
        let source = ctx.source_dir();
        if !source.is_dir() {
            return Err(PipelineError::precondition(
                &ctx.stage,
                format!("nothing to build: {} does not exist", source.display()),
            ));
        }
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StageContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let out = ctx.build_dir();
            fs::create_dir_all(&out)
                .with_context(|| format!("creating build dir {:?}", out))?;
            run_stage_command(ctx, &self.cmd, &self.env).await?;
            Ok(())
        })
    }

    /// A failed build leaves no half-written output behind.
    fn rollback(&self, ctx: &StageContext) -> Result<()> {
        let out = ctx.build_dir();
        if out.exists() {
            fs::remove_dir_all(&out)
                .with_context(|| format!("removing partial build {:?}", out))?;
            ctx.log(format!("removed partial build output {}", out.display()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ShellDeployer {
    cmd: String,
    env: BTreeMap<String, String>,
}

impl ShellDeployer {
    pub fn from_config(name: &str, cfg: &StageConfig) -> Result<Self> {
        Ok(Self {
            cmd: required_cmd(name, cfg)?,
            env: cfg.env.clone(),
        })
    }
}

impl StageBody for ShellDeployer {
    fn kind(&self) -> StageKind {
        StageKind::Deploy
    }

    fn check_preconditions(&self, ctx: &StageContext) -> Result<()> {
        let source = ctx.source_dir();
        if !source.is_dir() {
            return Err(PipelineError::precondition(
                &ctx.stage,
                format!("nothing to deploy: {} was never built", source.display()),
            ));
        }
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StageContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            run_stage_command(ctx, &self.cmd, &self.env).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
pub struct CopyDeployer {
    target: PathBuf,
}

impl CopyDeployer {
    pub fn from_config(name: &str, cfg: &StageConfig, config: &ConfigFile) -> Result<Self> {
        let target = cfg.target_dir.as_ref().ok_or_else(|| {
            PipelineError::ConfigError(format!(
                "stage '{}' uses driver 'copy-deploy' and requires `target_dir`",
                name
            ))
        })?;
        Ok(Self {
            target: config.resolve(target),
        })
    }

    pub fn target(&self) -> &PathBuf {
        &self.target
    }
}

impl StageBody for CopyDeployer {
    fn kind(&self) -> StageKind {
        StageKind::Deploy
    }

    fn check_preconditions(&self, ctx: &StageContext) -> Result<()> {
        let source = ctx.source_dir();
        if !source.is_dir() {
            return Err(PipelineError::precondition(
                &ctx.stage,
                format!("nothing to deploy: {} was never built", source.display()),
            ));
        }
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StageContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let source = ctx.source_dir();
            ctx.log(format!(
                "copying {} to {}",
                source.display(),
                self.target.display()
            ));

            if self.target.exists() {
                fs::remove_dir_all(&self.target)
                    .with_context(|| format!("clearing deploy target {:?}", self.target))?;
            }
            let copied = copy_tree(&source, &self.target)?;
            ctx.log(format!("copied {copied} files"));
            Ok(())
        })
    }
}
