// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Unknown stage driver '{driver}' for stage '{stage}'")]
    UnknownDriver { stage: String, driver: String },

    #[error("Cycle detected in stage graph: {0}")]
    StageCycle(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    /// A stage could not start because something it depends on is missing.
    #[error("Precondition failed for stage '{stage}': {reason}")]
    Precondition { stage: String, reason: String },

    /// The OS refused to start a process, or a fork launch exited non-zero.
    #[error("Failed to launch `{command}` (exit code {code:?}): {stderr}")]
    Launch {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// A stage body failed after it was marked as started.
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn precondition(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Precondition {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;
