// src/export/manifest.rs

//! Content-hash manifest of the export working tree.
//!
//! Export commands rewrite files wholesale, so modification times say little
//! about what actually changed. After every job the tree is hashed with
//! blake3 and compared against the manifest from the previous export; only
//! files whose content differs (or which disappeared) are reported.
//!
//! On disk (`<data_dir>/manifest`) it is one `<hash> <relative path>` line
//! per file, sorted by path.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use globset::GlobSet;
use tracing::debug;

use crate::export::files::FileEntry;
use crate::fs::{FileSystem, relative_slash_path};
use crate::pipeline::trigger::build_globset;

pub const MANIFEST_FILE: &str = "manifest";

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// The part of the export tree an export job owns.
#[derive(Clone, Debug)]
pub struct ExportScope {
    set: GlobSet,
}

impl ExportScope {
    pub fn new(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            set: build_globset(patterns)?,
        })
    }

    /// Scope covering the whole tree.
    pub fn everything() -> Result<Self> {
        Self::new(&["**".to_string()])
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a manifest; a missing file is an empty manifest.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            return Ok(Self::new());
        }
        let contents = fs.read_to_string(path)?;
        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some((hash, rel)) = trimmed.split_once(' ') {
                entries.insert(rel.to_string(), hash.to_string());
            }
        }
        debug!(path = ?path, files = entries.len(), "loaded export manifest");
        Ok(Self { entries })
    }

    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (rel, hash) in &self.entries {
            writeln!(out, "{hash} {rel}")?;
        }
        fs.write(path, out.as_bytes())
            .with_context(|| format!("writing export manifest {:?}", path))
    }

    /// Hash every file under `root` that falls inside `scope`.
    pub fn scan(fs: &dyn FileSystem, root: &Path, scope: &ExportScope) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for path in fs.walk_files(root)? {
            let Some(rel) = relative_slash_path(root, &path) else {
                continue;
            };
            if !scope.contains(&rel) {
                continue;
            }
            entries.insert(rel, compute_file_hash(fs, &path)?);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, rel_path: &str) -> Option<&str> {
        self.entries.get(rel_path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes from `self` to `current` within `scope`: new or modified files
    /// as writes, vanished files as deletes.
    pub fn diff(&self, current: &Manifest, scope: &ExportScope) -> Vec<FileEntry> {
        let mut changes = Vec::new();
        for (rel, hash) in &current.entries {
            if self.entries.get(rel) != Some(hash) {
                changes.push(FileEntry::written(rel.clone()));
            }
        }
        for rel in self.entries.keys() {
            if scope.contains(rel) && !current.entries.contains_key(rel) {
                changes.push(FileEntry::deleted(rel.clone()));
            }
        }
        changes.sort();
        changes
    }

    /// Replace everything within `scope` by the entries of `current`.
    pub fn apply(&mut self, current: &Manifest, scope: &ExportScope) {
        self.entries.retain(|rel, _| !scope.contains(rel));
        self.entries
            .extend(current.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}
