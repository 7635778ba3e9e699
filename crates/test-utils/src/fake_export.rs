//! Export-side fakes: a scripted export job and a recording messenger.

use std::fs;
use std::sync::{Arc, Mutex};

use stagehand::errors::{PipelineError, Result};
use stagehand::export::{
    BatchPosition, ExportContext, ExportJob, FileCollection, FileEntry, Messenger,
};
use stagehand::stage::BoxFuture;

/// Export job that writes and deletes fixed files in the export tree and
/// reports exactly those as its changes.
#[derive(Debug, Clone)]
pub struct FakeExportJob {
    name: String,
    writes: Vec<(String, String)>,
    deletes: Vec<String>,
    fail: Option<String>,
    positions: Arc<Mutex<Vec<BatchPosition>>>,
}

impl FakeExportJob {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            writes: Vec::new(),
            deletes: Vec::new(),
            fail: None,
            positions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writes(mut self, rel_path: &str, content: &str) -> Self {
        self.writes.push((rel_path.to_string(), content.to_string()));
        self
    }

    pub fn deletes(mut self, rel_path: &str) -> Self {
        self.deletes.push(rel_path.to_string());
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail = Some(reason.to_string());
        self
    }

    /// Positions this job was run at, across batches.
    pub fn positions(&self) -> Vec<BatchPosition> {
        self.positions.lock().unwrap().clone()
    }

    pub fn into_job(self) -> Arc<dyn ExportJob> {
        Arc::new(self)
    }
}

impl ExportJob for FakeExportJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a, 'b: 'a>(
        &'a self,
        ctx: &'a mut ExportContext<'b>,
    ) -> BoxFuture<'a, Result<FileCollection>> {
        Box::pin(async move {
            self.positions.lock().unwrap().push(ctx.position);

            if let Some(reason) = &self.fail {
                return Err(PipelineError::StageFailed {
                    stage: format!("export.{}", self.name),
                    reason: reason.clone(),
                });
            }

            let mut collection = FileCollection::new(self.name.clone());
            for (rel, content) in &self.writes {
                let path = ctx.export_dir.join(rel);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, content)?;
                collection.push(FileEntry::written(rel.clone()));
            }
            for rel in &self.deletes {
                let path = ctx.export_dir.join(rel);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
                collection.push(FileEntry::deleted(rel.clone()));
            }
            collection.mark_executed();
            Ok(collection)
        })
    }
}

/// Messenger that keeps everything it was told.
#[derive(Debug, Clone, Default)]
pub struct RecordingMessenger {
    statuses: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Messenger for RecordingMessenger {
    fn status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}
