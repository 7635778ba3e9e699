// src/export/messenger.rs

use std::fmt::Debug;

use tracing::{error, info};

/// Where request-context batches report their outcome, since they cannot
/// return errors to whoever queued the jobs.
pub trait Messenger: Send + Sync + Debug {
    fn status(&self, message: &str);
    fn error(&self, message: &str);
}

/// Messenger that only emits tracing events.
#[derive(Debug, Clone, Default)]
pub struct TracingMessenger;

impl Messenger for TracingMessenger {
    fn status(&self, message: &str) {
        info!(target: "stagehand::messenger", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "stagehand::messenger", "{message}");
    }
}
