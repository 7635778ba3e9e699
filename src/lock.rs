// src/lock.rs

//! Named, cross-process locks with stale-lock eviction.
//!
//! A lock is a file `<dir>/<name>.lock` holding a small TOML record with the
//! holder and an expiry time. Acquisition publishes a fully written record
//! with `hard_link`, which fails atomically if the lock file already exists.
//! A lock whose expiry has passed is considered abandoned (its holder crashed
//! or was killed) and may be taken over by the next attempt. The timeout
//! never interrupts a live holder; it only decides when a lock is stale.
//!
//! Locks are released by [`LockGuard::release`] or when the guard is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::errors::Result;
use crate::release::sanitize_id;

static HOLDER_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Lock name for one stage in one run mode: `<run_mode>--<stage>`.
pub fn lock_name(run_mode: &str, stage: &str) -> String {
    format!("{run_mode}--{stage}")
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    clock: SharedClock,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize_id(name)))
    }

    /// Try to take `name` without waiting.
    ///
    /// Returns `Ok(None)` when another holder owns a lock that has not yet
    /// expired. A held lock older than its own timeout is evicted and taken.
    pub fn try_acquire(&self, name: &str, timeout: Duration) -> Result<Option<LockGuard>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating lock dir {:?}", self.dir))?;

        let path = self.lock_path(name);
        let holder = format!(
            "{}-{}",
            std::process::id(),
            HOLDER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = LockRecord {
            holder: holder.clone(),
            acquired_at: now,
            expires_at,
        };

        let staged = self.dir.join(format!("{}.lock.{holder}", sanitize_id(name)));
        fs::write(&staged, toml::to_string(&record)?)
            .with_context(|| format!("staging lock record {:?}", staged))?;

        // One retry after evicting a stale holder.
        let mut acquired = false;
        for _ in 0..2 {
            match fs::hard_link(&staged, &path) {
                Ok(()) => {
                    acquired = true;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if !self.evict_if_stale(name, &path, &holder)? {
                        break;
                    }
                }
                Err(e) => {
                    let _ = fs::remove_file(&staged);
                    return Err(e.into());
                }
            }
        }
        let _ = fs::remove_file(&staged);

        if !acquired {
            debug!(lock = %name, "lock is held elsewhere");
            return Ok(None);
        }

        debug!(lock = %name, holder = %holder, "lock acquired");
        Ok(Some(LockGuard {
            name: name.to_string(),
            path,
            holder,
            released: false,
        }))
    }

    /// Whether `name` is currently held by a live (non-expired) holder.
    pub fn is_held(&self, name: &str) -> bool {
        match read_record(&self.lock_path(name)) {
            Ok(Some(record)) => self.clock.now() < record.expires_at,
            _ => false,
        }
    }

    /// Remove the lock at `path` if it has expired. Returns true when the
    /// caller should retry acquisition.
    fn evict_if_stale(&self, name: &str, path: &Path, evictor: &str) -> Result<bool> {
        let record = match read_record(path) {
            Ok(Some(record)) => record,
            // Released between our link attempt and this read.
            Ok(None) => return Ok(true),
            Err(e) => {
                warn!(lock = %name, error = %e, "unreadable lock record; treating as held");
                return Ok(false);
            }
        };

        if self.clock.now() < record.expires_at {
            return Ok(false);
        }

        // One tombstone per (stale holder, evictor) pair.
        let tombstone = path.with_extension(format!("stale.{}.{evictor}", record.holder));
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        // Someone may have replaced the stale lock between our read and the
        // rename; hand theirs back if so.
        match read_record(&tombstone) {
            Ok(Some(moved)) if moved.holder != record.holder => {
                if let Err(e) = fs::hard_link(&tombstone, path) {
                    warn!(
                        lock = %name,
                        holder = %moved.holder,
                        error = %e,
                        "could not hand a fresh lock back after eviction"
                    );
                }
                let _ = fs::remove_file(&tombstone);
                return Ok(false);
            }
            _ => {}
        }
        let _ = fs::remove_file(&tombstone);

        info!(
            lock = %name,
            stale_holder = %record.holder,
            expired_at = %record.expires_at,
            "evicted stale lock"
        );
        Ok(true)
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Proof of holding a lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    path: PathBuf,
    holder: String,
    released: bool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Only remove the file if it is still ours; after a stale eviction it
        // may belong to someone else.
        match read_record(&self.path) {
            Ok(Some(record)) if record.holder == self.holder => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(lock = %self.name, error = %e, "failed to release lock");
                } else {
                    debug!(lock = %self.name, "lock released");
                }
            }
            Ok(_) => {
                warn!(lock = %self.name, "lock was taken over before release");
            }
            Err(e) => {
                warn!(lock = %self.name, error = %e, "could not read lock on release");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
