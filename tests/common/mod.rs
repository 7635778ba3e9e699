#![allow(dead_code)]

pub use stagehand_test_utils::builders;
pub use stagehand_test_utils::{TestProject, epoch, init_tracing, with_timeout};

use std::error::Error;
use std::time::Duration;

use stagehand::release::{Release, ReleaseStore, TaskSettings};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Release store under `<project>/.stagehand/releases` with the default
/// 300 s staleness window.
pub fn release_store(project: &TestProject) -> ReleaseStore {
    release_store_with_staleness(project, Duration::from_secs(300))
}

pub fn release_store_with_staleness(project: &TestProject, staleness: Duration) -> ReleaseStore {
    ReleaseStore::new(
        project.root().join(".stagehand").join("releases"),
        TaskSettings::new(project.shared_clock(), staleness),
    )
}

/// Mark `task_id` done in `release` after it ran for `seconds`.
pub fn complete_task(project: &TestProject, release: &Release, task_id: &str, seconds: u64) {
    let task = release.task(task_id);
    task.set_started().expect("start task");
    project.clock.advance(Duration::from_secs(seconds));
    task.set_done().expect("finish task");
}
