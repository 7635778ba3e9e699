// src/export/mod.rs

//! Export batches: the first stage of every release.
//!
//! - [`queue`] batches keyed jobs and turns their output into a release.
//! - [`job`] is the job interface and the configured shell exporter.
//! - [`files`] describes what a batch changed.
//! - [`manifest`] detects changes by content hash.
//! - [`messenger`] reports request-context outcomes.

pub mod files;
pub mod job;
pub mod manifest;
pub mod messenger;
pub mod queue;

use std::sync::Arc;

use crate::config::ConfigFile;
use crate::errors::{PipelineError, Result};

pub use files::{FileCollection, FileCollectionGroup, FileEntry, FileOperation};
pub use job::{BatchPosition, CommandExportJob, ExportContext, ExportJob};
pub use manifest::{ExportScope, Manifest, compute_file_hash};
pub use messenger::{Messenger, TracingMessenger};
pub use queue::{BatchReport, ExportJobQueue, ExportOptions};

/// Queue the configured exporters, in name order. With `only` non-empty,
/// just those jobs.
pub fn queue_from_config(config: &ConfigFile, only: &[String]) -> Result<ExportJobQueue> {
    for name in only {
        if !config.export.contains_key(name) {
            return Err(PipelineError::ConfigError(format!(
                "unknown export job '{name}'"
            )));
        }
    }

    let mut queue = ExportJobQueue::new();
    for (name, cfg) in &config.export {
        if !only.is_empty() && !only.contains(name) {
            continue;
        }
        let job = CommandExportJob::from_config(name, cfg)?;
        queue.add(name.clone(), Arc::new(job), ExportOptions::default());
    }
    Ok(queue)
}
