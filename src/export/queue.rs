// src/export/queue.rs

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::EXPORT_STAGE;
use crate::errors::{PipelineError, Result};
use crate::export::files::FileCollectionGroup;
use crate::export::job::{BatchPosition, ExportContext, ExportJob};
use crate::export::manifest::{MANIFEST_FILE, Manifest};
use crate::export::messenger::Messenger;
use crate::fs::{FileSystem, RealFileSystem, copy_tree};
use crate::lock::lock_name;
use crate::pipeline::{Pipeline, StageReport};
use crate::release::Release;
use crate::stage::StageOutcome;
use crate::stage::runner::{heartbeat_interval_for, spawn_heartbeat};

/// An export batch holding its lock longer than this is presumed dead.
pub const EXPORT_LOCK_TIMEOUT_SECS: u64 = 3600;

/// Settle a release after a batch error. Once the export task has started
/// the release is kept with the task failed, so status can show it; its
/// export never becomes done, so nothing downstream can start from it. A
/// release whose export never started is discarded.
fn abandon(pipeline: &Pipeline, release: &Release, error: &PipelineError) {
    let task = release.task(EXPORT_STAGE);
    let settled = if task.is_started() {
        task.set_failed(&error.to_string())
    } else {
        pipeline.releases().discard(release)
    };
    if let Err(e) = settled {
        warn!(release = %release.unique_id(), error = %e, "failed to settle release after export error");
    }
}

fn heartbeat_interval(pipeline: &Pipeline) -> Duration {
    heartbeat_interval_for(pipeline.releases().settings().staleness)
}

/// Per-job options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Fire the stages after `export` once the batch produced a release.
    pub trigger_downstream: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            trigger_downstream: true,
        }
    }
}

struct QueuedJob {
    key: String,
    job: Arc<dyn ExportJob>,
    options: ExportOptions,
}

/// What one batch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// `Success` when a release was kept, `Skipped` when nothing changed,
    /// `Busy` when another export held the lock.
    pub outcome: StageOutcome,
    /// The release that was kept, if any.
    pub release_id: Option<String>,
    pub group: FileCollectionGroup,
    /// Downstream stages started by this batch.
    pub stages: Vec<StageReport>,
}

impl BatchReport {
    fn without_release(outcome: StageOutcome, group: FileCollectionGroup) -> Self {
        Self {
            outcome,
            release_id: None,
            group,
            stages: Vec::new(),
        }
    }
}

/// Ordered, de-duplicated list of export jobs that run as one batch.
///
/// A batch runs its jobs strictly one after another, each told its position
/// so deferred work can wait for the last job. The batch writes into the
/// export working tree; if anything changed, the tree is snapshotted into a
/// fresh release and the stages after `export` are started.
pub struct ExportJobQueue {
    jobs: Vec<QueuedJob>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for ExportJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJobQueue")
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

impl Default for ExportJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            fs: Arc::new(RealFileSystem),
        }
    }

    /// Filesystem used for the manifest and for change scanning.
    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Queue `job` under `key`. Returns false (and keeps the earlier job) if
    /// the key is already queued.
    pub fn add(
        &mut self,
        key: impl Into<String>,
        job: Arc<dyn ExportJob>,
        options: ExportOptions,
    ) -> bool {
        let key = key.into();
        if self.jobs.iter().any(|q| q.key == key) {
            return false;
        }
        self.jobs.push(QueuedJob { key, job, options });
        true
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.jobs.iter().map(|q| q.key.as_str()).collect()
    }

    /// Request-context execution: failures are reported through `messenger`
    /// and never returned.
    pub async fn execute(
        &mut self,
        pipeline: &Pipeline,
        messenger: &dyn Messenger,
    ) -> Option<BatchReport> {
        match self.drain(pipeline).await {
            Ok(report) => {
                match &report.outcome {
                    StageOutcome::Success => messenger.status(&format!(
                        "export finished: {} files changed",
                        report.group.changed_paths().len()
                    )),
                    StageOutcome::Busy => messenger.status("another export is in progress"),
                    _ => messenger.status("export finished: nothing changed"),
                }
                for stage in &report.stages {
                    if let StageOutcome::Failed(reason) = &stage.outcome {
                        messenger.error(&format!("stage '{}' failed: {reason}", stage.stage));
                    }
                }
                Some(report)
            }
            Err(e) => {
                messenger.error(&format!("export failed: {e}"));
                None
            }
        }
    }

    /// Run and empty the queue, propagating errors. A busy export lock leaves
    /// the queue as it was.
    pub async fn drain(&mut self, pipeline: &Pipeline) -> Result<BatchReport> {
        let jobs = std::mem::take(&mut self.jobs);
        if jobs.is_empty() {
            return Ok(BatchReport::without_release(
                StageOutcome::Skipped,
                FileCollectionGroup::new(),
            ));
        }

        let config = pipeline.config();
        let name = lock_name(&config.pipeline.run_mode, EXPORT_STAGE);
        let timeout = Duration::from_secs(EXPORT_LOCK_TIMEOUT_SECS);
        let Some(guard) = pipeline.locks().try_acquire(&name, timeout)? else {
            info!(lock = %name, queued = jobs.len(), "export already in progress");
            // Keep the jobs so the caller can retry the same queue.
            self.jobs = jobs;
            return Ok(BatchReport::without_release(
                StageOutcome::Busy,
                FileCollectionGroup::new(),
            ));
        };

        let release = pipeline.releases().create()?;
        let result = self.run_batch(pipeline, &release, &jobs).await;

        let (group, manifest) = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(release = %release.unique_id(), error = %e, "export batch failed");
                abandon(pipeline, &release, &e);
                return Err(e);
            }
        };

        if group.is_empty() || !group.is_any_executed() {
            info!(release = %release.unique_id(), "export changed nothing; discarding release");
            pipeline.releases().discard(&release)?;
            return Ok(BatchReport::without_release(StageOutcome::Skipped, group));
        }

        if let Err(e) = self.publish(pipeline, &release, &group, &manifest) {
            warn!(release = %release.unique_id(), error = %e, "publishing export failed");
            abandon(pipeline, &release, &e);
            return Err(e);
        }
        guard.release();

        let stages = if jobs.iter().any(|q| q.options.trigger_downstream) {
            pipeline.on_stage_finished(EXPORT_STAGE, &release).await?
        } else {
            Vec::new()
        };

        Ok(BatchReport {
            outcome: StageOutcome::Success,
            release_id: Some(release.unique_id().to_string()),
            group,
            stages,
        })
    }

    async fn run_batch(
        &self,
        pipeline: &Pipeline,
        release: &Release,
        jobs: &[QueuedJob],
    ) -> Result<(FileCollectionGroup, Manifest)> {
        let config = pipeline.config();
        let export_dir = config.export_dir();
        let manifest_path = config.data_dir().join(MANIFEST_FILE);
        let mut manifest = Manifest::load(self.fs.as_ref(), &manifest_path)?;

        let task = release.task(EXPORT_STAGE);
        task.truncate_log()?;
        task.set_started()?;

        let ticker = spawn_heartbeat(task.clone(), heartbeat_interval(pipeline));
        let result = self.run_jobs(release, &export_dir, &mut manifest, jobs).await;
        ticker.abort();
        let _ = ticker.await;

        Ok((result?, manifest))
    }

    async fn run_jobs(
        &self,
        release: &Release,
        export_dir: &Path,
        manifest: &mut Manifest,
        jobs: &[QueuedJob],
    ) -> Result<FileCollectionGroup> {
        let task = release.task(EXPORT_STAGE);
        let mut group = FileCollectionGroup::new();
        for (index, queued) in jobs.iter().enumerate() {
            let position = BatchPosition::new(index, jobs.len());
            let mut ctx = ExportContext {
                release,
                export_dir,
                manifest: &mut *manifest,
                fs: self.fs.as_ref(),
                position,
            };
            task.append_log(&format!(
                "job {}/{}: {} ({})",
                index + 1,
                jobs.len(),
                queued.key,
                queued.job.name()
            ))?;
            let collection = queued.job.run(&mut ctx).await?;
            info!(
                job = %queued.key,
                changed = collection.entries().len(),
                "export job finished"
            );
            group.add(collection);
        }

        Ok(group)
    }

    /// Snapshot the export tree into the release, record what changed and
    /// mark the export task done.
    fn publish(
        &self,
        pipeline: &Pipeline,
        release: &Release,
        group: &FileCollectionGroup,
        manifest: &Manifest,
    ) -> Result<()> {
        let config = pipeline.config();
        let export_dir = config.export_dir();
        let snapshot = release.export_dir();

        if export_dir.is_dir() {
            copy_tree(&export_dir, &snapshot)?;
        } else {
            fs::create_dir_all(&snapshot)
                .with_context(|| format!("creating export snapshot {:?}", snapshot))?;
        }

        let changed = group.changed_paths();
        release.write_changes(&changed)?;
        manifest.save(self.fs.as_ref(), &config.data_dir().join(MANIFEST_FILE))?;

        let task = release.task(EXPORT_STAGE);
        task.append_log(&format!("{} files changed", changed.len()))?;
        task.set_done()?;
        info!(
            release = %release.unique_id(),
            changed = changed.len(),
            "export published"
        );
        Ok(())
    }
}
