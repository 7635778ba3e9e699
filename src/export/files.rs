// src/export/files.rs

//! What an export batch wrote and deleted.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileOperation {
    Write,
    Delete,
}

/// One file touched by an export job, relative to the export tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileEntry {
    pub path: String,
    pub operation: FileOperation,
}

impl FileEntry {
    pub fn written(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: FileOperation::Write,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: FileOperation::Delete,
        }
    }
}

/// Files produced by a single export job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCollection {
    job: String,
    entries: Vec<FileEntry>,
    executed: bool,
}

impl FileCollection {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            entries: Vec::new(),
            executed: false,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn push(&mut self, entry: FileEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = FileEntry>) {
        self.entries.extend(entries);
    }

    /// Record that the job actually ran (as opposed to being short-circuited).
    pub fn mark_executed(&mut self) {
        self.executed = true;
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }
}

/// Every collection produced by one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCollectionGroup {
    collections: Vec<FileCollection>,
}

impl FileCollectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, collection: FileCollection) {
        self.collections.push(collection);
    }

    pub fn collections(&self) -> &[FileCollection] {
        &self.collections
    }

    /// No collection wrote or deleted anything.
    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(FileCollection::is_empty)
    }

    pub fn is_any_executed(&self) -> bool {
        self.collections.iter().any(FileCollection::is_executed)
    }

    /// Sorted, de-duplicated paths written or deleted by the batch.
    pub fn changed_paths(&self) -> Vec<String> {
        self.collections
            .iter()
            .flat_map(|c| c.entries.iter().map(|e| e.path.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
