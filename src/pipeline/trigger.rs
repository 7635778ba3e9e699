// src/pipeline/trigger.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled `trigger` / `exclude` patterns of one stage.
///
/// Patterns are matched against paths relative to the export working tree,
/// with `/` separators (e.g. `"content/node/1.json"`).
#[derive(Clone)]
pub struct StageTrigger {
    stage: String,
    trigger_set: GlobSet,
    exclude_set: Option<GlobSet>,
}

impl fmt::Debug for StageTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageTrigger")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl StageTrigger {
    pub fn new(stage: impl Into<String>, trigger: &[String], exclude: &[String]) -> Result<Self> {
        let stage = stage.into();
        let trigger_set = build_globset(trigger)
            .with_context(|| format!("building trigger globset for stage {stage}"))?;
        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(
                build_globset(exclude)
                    .with_context(|| format!("building exclude globset for stage {stage}"))?,
            )
        };
        Ok(Self {
            stage,
            trigger_set,
            exclude_set,
        })
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.trigger_set.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude_set {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }

    /// True if any of `paths` is relevant to this stage.
    pub fn matches_any<S: AsRef<str>>(&self, paths: &[S]) -> bool {
        paths.iter().any(|p| self.matches(p.as_ref()))
    }
}

/// Build a GlobSet from simple string patterns.
pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
