// src/stage/log.rs

//! Per-run stage log with a "must log" gate.
//!
//! Messages produced before a run is known to proceed (lock taken,
//! preconditions met, not already done) are held back, so an attempt that
//! ends as "already in progress" leaves the previous run's log untouched.
//! Once the gate opens the log is truncated, the held messages are written
//! and every later message goes straight to the task log.

use tracing::{info, warn};

use crate::errors::Result;
use crate::release::Task;

#[derive(Debug)]
pub struct StageLog {
    stage: String,
    buffer: Vec<String>,
    sink: Option<Task>,
}

impl StageLog {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            buffer: Vec::new(),
            sink: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Messages still waiting for the gate to open.
    pub fn pending(&self) -> &[String] {
        &self.buffer
    }

    pub fn log(&mut self, message: &str) {
        info!(stage = %self.stage, "{message}");
        match &self.sink {
            Some(task) => {
                if let Err(e) = task.append_log(message) {
                    warn!(stage = %self.stage, error = %e, "failed to write task log");
                }
            }
            None => self.buffer.push(message.to_string()),
        }
    }

    /// Open the gate: replace the previous run's log and flush held messages.
    pub fn open(&mut self, task: &Task) -> Result<()> {
        task.truncate_log()?;
        for message in self.buffer.drain(..) {
            task.append_log(&message)?;
        }
        self.sink = Some(task.clone());
        Ok(())
    }
}
