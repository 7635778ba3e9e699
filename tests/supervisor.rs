// tests/supervisor.rs

mod common;
use crate::common::{TestProject, TestResult, complete_task, release_store};

use std::time::Duration;

use stagehand::release::TaskSupervisor;
use stagehand::types::TaskStatus;

const TASK: &str = "build-site";

#[test]
fn average_covers_done_runs_only() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let r1 = store.create()?;
    complete_task(&project, &r1, TASK, 60);
    let r2 = store.create()?;
    complete_task(&project, &r2, TASK, 120);
    let r3 = store.create()?;
    r3.task(TASK).set_started()?;
    r3.task(TASK).set_failed("boom")?;

    let supervisor = TaskSupervisor::new(store, 10, 3600);
    assert_eq!(supervisor.average_task_time(TASK)?, 90.0);
    Ok(())
}

#[test]
fn average_falls_back_to_the_ceiling_without_history() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);
    store.create()?;

    let supervisor = TaskSupervisor::new(store, 10, 3600).with_ceiling(TASK, 900);
    assert_eq!(supervisor.average_task_time(TASK)?, 900.0);
    assert_eq!(supervisor.average_task_time("deploy-cdn")?, 3600.0);
    Ok(())
}

#[test]
fn average_only_samples_the_newest_releases() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    for seconds in [1000, 10, 20] {
        let release = store.create()?;
        complete_task(&project, &release, TASK, seconds);
    }

    let supervisor = TaskSupervisor::new(store, 2, 3600);
    assert_eq!(supervisor.average_task_time(TASK)?, 15.0);
    Ok(())
}

#[test]
fn percentage_follows_task_status() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let history = store.create()?;
    complete_task(&project, &history, TASK, 100);

    let current = store.create()?;
    let supervisor = TaskSupervisor::new(store, 10, 3600);
    let uid = current.unique_id().to_string();

    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 0);

    current.task(TASK).set_started()?;
    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 1);

    project.clock.advance(Duration::from_secs(50));
    current.task(TASK).heartbeat()?;
    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 50);

    project.clock.advance(Duration::from_secs(200));
    current.task(TASK).heartbeat()?;
    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 99);

    current.task(TASK).set_failed("interrupted")?;
    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 0);

    current.task(TASK).set_started()?;
    current.task(TASK).set_done()?;
    assert_eq!(supervisor.task_percentage(&uid, TASK)?, 100);
    Ok(())
}

#[test]
fn remaining_seconds_can_go_negative_while_running() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let history = store.create()?;
    complete_task(&project, &history, TASK, 90);

    let current = store.create()?;
    let supervisor = TaskSupervisor::new(store, 10, 3600);
    let uid = current.unique_id().to_string();
    let task = current.task(TASK);

    assert_eq!(supervisor.remaining_seconds(&uid, TASK)?, 0);

    task.set_started()?;
    project.clock.advance(Duration::from_secs(30));
    task.heartbeat()?;
    assert_eq!(supervisor.remaining_seconds(&uid, TASK)?, 60);

    project.clock.advance(Duration::from_secs(100));
    task.heartbeat()?;
    assert_eq!(supervisor.remaining_seconds(&uid, TASK)?, -40);

    task.set_done()?;
    assert_eq!(supervisor.remaining_seconds(&uid, TASK)?, 0);
    Ok(())
}

#[test]
fn last_release_by_status_searches_newest_first() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let old_done = store.create()?;
    complete_task(&project, &old_done, TASK, 10);
    let new_done = store.create()?;
    complete_task(&project, &new_done, TASK, 10);
    let failed = store.create()?;
    failed.task(TASK).set_started()?;
    failed.task(TASK).set_failed("nope")?;

    let supervisor = TaskSupervisor::new(store, 10, 3600);

    let done = supervisor.last_release_by_task_status(TASK, TaskStatus::Done)?;
    assert_eq!(
        done.map(|r| r.unique_id().to_string()),
        Some(new_done.unique_id().to_string())
    );

    let last_failed = supervisor.last_release_by_task_status(TASK, TaskStatus::Failed)?;
    assert_eq!(
        last_failed.map(|r| r.unique_id().to_string()),
        Some(failed.unique_id().to_string())
    );
    Ok(())
}

#[test]
fn only_the_newest_release_can_be_running() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let older = store.create()?;
    older.task(TASK).set_started()?;
    project.clock.advance(Duration::from_secs(1));
    let newest = store.create()?;

    let supervisor = TaskSupervisor::new(store.clone(), 10, 3600);
    assert!(
        supervisor
            .last_release_by_task_status(TASK, TaskStatus::Running)?
            .is_none()
    );

    newest.task(TASK).set_started()?;
    let running = supervisor.last_release_by_task_status(TASK, TaskStatus::Running)?;
    assert_eq!(
        running.map(|r| r.unique_id().to_string()),
        Some(newest.unique_id().to_string())
    );
    Ok(())
}

#[test]
fn progress_bundles_the_polling_view() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let history = store.create()?;
    complete_task(&project, &history, TASK, 200);

    let current = store.create()?;
    current.task(TASK).set_started()?;
    project.clock.advance(Duration::from_secs(50));
    current.task(TASK).append_log("halfway-ish")?;

    let supervisor = TaskSupervisor::new(store, 10, 3600);
    let progress = supervisor.progress(current.unique_id(), TASK)?;

    assert_eq!(progress.status, TaskStatus::Running);
    assert!(progress.is_started);
    assert!(progress.is_running);
    assert!(!progress.is_done);
    assert!(!progress.is_failed);
    assert_eq!(progress.elapsed_seconds, 50);
    assert_eq!(progress.remaining_seconds, 150);
    assert_eq!(progress.percentage, 25);
    assert_eq!(progress.failure, None);
    Ok(())
}
