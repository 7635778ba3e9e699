pub mod builders;
pub mod fake_export;
pub mod fake_stage;

use std::path::PathBuf;
use std::sync::{Arc, Once};

use chrono::{DateTime, TimeZone, Utc};
use stagehand::clock::{ManualClock, SharedClock};
use stagehand::config::ConfigFile;
use stagehand::pipeline::Pipeline;
use stagehand::stage::StageRegistry;
use stagehand::types::ExecutionContext;
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A fixed, readable starting instant for manual clocks.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Scratch project: a temp dir acting as the config root, plus a manual
/// clock shared by everything built from it.
pub struct TestProject {
    pub dir: TempDir,
    pub clock: ManualClock,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            clock: ManualClock::new(epoch()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }

    /// Anchor `config` at this project's root and build a pipeline over it.
    pub fn pipeline(
        &self,
        config: ConfigFile,
        registry: StageRegistry,
        context: ExecutionContext,
    ) -> Pipeline {
        Pipeline::new(
            config.with_root(self.root()),
            registry,
            self.shared_clock(),
            context,
        )
        .expect("build pipeline")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
