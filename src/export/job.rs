// src/export/job.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::config::{EXPORT_STAGE, ExportConfig};
use crate::errors::{PipelineError, Result};
use crate::exec::CommandRunner;
use crate::export::files::FileCollection;
use crate::export::manifest::{ExportScope, Manifest};
use crate::fs::FileSystem;
use crate::release::Release;
use crate::stage::BoxFuture;

/// Where a job sits in its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub index: usize,
    pub len: usize,
}

impl BatchPosition {
    pub fn new(index: usize, len: usize) -> Self {
        Self { index, len }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    /// Deferred work (commits, cache flushes) runs only here.
    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.len
    }
}

/// What a job gets to work with while its batch runs.
#[derive(Debug)]
pub struct ExportContext<'b> {
    pub release: &'b Release,
    /// Working tree the jobs write into.
    pub export_dir: &'b Path,
    /// Hashes as of the previous job (or the previous export).
    pub manifest: &'b mut Manifest,
    pub fs: &'b dyn FileSystem,
    pub position: BatchPosition,
}

/// A unit of export work. Reports the files it changed; an empty collection
/// means "nothing changed".
pub trait ExportJob: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a, 'b: 'a>(
        &'a self,
        ctx: &'a mut ExportContext<'b>,
    ) -> BoxFuture<'a, Result<FileCollection>>;
}

/// Runs a configured exporter command in the export tree and reports what
/// its run changed within `scope`.
#[derive(Debug, Clone)]
pub struct CommandExportJob {
    name: String,
    cmd: String,
    scope: ExportScope,
    finalize_cmd: Option<String>,
    env: BTreeMap<String, String>,
}

impl CommandExportJob {
    pub fn from_config(name: &str, cfg: &ExportConfig) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            cmd: cfg.cmd.clone(),
            scope: ExportScope::new(&cfg.scope)?,
            finalize_cmd: cfg.finalize_cmd.clone(),
            env: cfg.env.clone(),
        })
    }

    async fn run_command(&self, cmd: &str, cwd: &Path, release: &Release) -> Result<()> {
        let mut env = self.env.clone();
        env.insert("STAGEHAND_STAGE".to_string(), EXPORT_STAGE.to_string());
        env.insert(
            "STAGEHAND_RELEASE_ID".to_string(),
            release.unique_id().to_string(),
        );
        env.insert(
            "STAGEHAND_RELEASE_DIR".to_string(),
            release.dir().to_string_lossy().into_owned(),
        );
        env.insert(
            "STAGEHAND_EXPORT_DIR".to_string(),
            cwd.to_string_lossy().into_owned(),
        );

        let result = CommandRunner::new().run(cmd, Some(cwd), &env, None).await?;
        let task = release.task(EXPORT_STAGE);
        for line in result.stdout().lines().chain(result.stderr().lines()) {
            task.append_log(&format!("{}: {line}", self.name))?;
        }

        if !result.is_success() {
            return Err(PipelineError::StageFailed {
                stage: format!("{EXPORT_STAGE}.{}", self.name),
                reason: format!(
                    "`{cmd}` exited with code {}: {}",
                    result.return_code(),
                    result.stderr().trim()
                ),
            });
        }
        Ok(())
    }
}

impl ExportJob for CommandExportJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a, 'b: 'a>(
        &'a self,
        ctx: &'a mut ExportContext<'b>,
    ) -> BoxFuture<'a, Result<FileCollection>> {
        Box::pin(async move {
            fs::create_dir_all(ctx.export_dir)
                .with_context(|| format!("creating export dir {:?}", ctx.export_dir))?;
            let cwd = fs::canonicalize(ctx.export_dir)
                .with_context(|| format!("canonicalizing export dir {:?}", ctx.export_dir))?;

            info!(job = %self.name, release = %ctx.release.unique_id(), "running export job");
            self.run_command(&self.cmd, &cwd, ctx.release).await?;

            let current = Manifest::scan(ctx.fs, ctx.export_dir, &self.scope)?;
            let changes = ctx.manifest.diff(&current, &self.scope);
            ctx.manifest.apply(&current, &self.scope);
            debug!(job = %self.name, changed = changes.len(), "export job scanned");

            if ctx.position.is_last() {
                if let Some(finalize) = &self.finalize_cmd {
                    info!(job = %self.name, "running finalize command");
                    self.run_command(finalize, &cwd, ctx.release).await?;
                }
            }

            let mut collection = FileCollection::new(self.name.clone());
            collection.extend(changes);
            collection.mark_executed();
            Ok(collection)
        })
    }
}
