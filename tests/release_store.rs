// tests/release_store.rs

mod common;
use crate::common::{TestProject, TestResult, complete_task, release_store};

use std::time::Duration;

use stagehand::errors::PipelineError;

#[test]
fn many_releases_in_one_millisecond_keep_creation_order() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let created: Vec<String> = (0..12)
        .map(|_| store.create().map(|r| r.unique_id().to_string()))
        .collect::<Result<_, _>>()?;
    assert_eq!(created[10], "20260101120000000-0010");

    let listed: Vec<String> = store
        .list()?
        .iter()
        .map(|r| r.unique_id().to_string())
        .collect();
    assert_eq!(listed, created);
    assert_eq!(
        store.current()?.map(|r| r.unique_id().to_string()),
        created.last().cloned()
    );
    Ok(())
}

#[test]
fn release_ids_are_timestamps_that_sort_chronologically() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let first = store.create()?;
    let same_instant = store.create()?;
    project.clock.advance(Duration::from_millis(1500));
    let later = store.create()?;

    assert_eq!(first.unique_id(), "20260101120000000");
    assert_eq!(same_instant.unique_id(), "20260101120000000-0001");
    assert_eq!(later.unique_id(), "20260101120001500");

    let ids: Vec<String> = store
        .list()?
        .iter()
        .map(|r| r.unique_id().to_string())
        .collect();
    assert_eq!(
        ids,
        vec![
            first.unique_id().to_string(),
            same_instant.unique_id().to_string(),
            later.unique_id().to_string(),
        ]
    );
    assert_eq!(
        store.current()?.map(|r| r.unique_id().to_string()),
        Some(later.unique_id().to_string())
    );
    Ok(())
}

#[test]
fn empty_store_has_no_current_release() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    assert!(store.list()?.is_empty());
    assert!(store.current()?.is_none());
    Ok(())
}

#[test]
fn unknown_or_unsafe_ids_are_not_found() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);
    store.create()?;

    assert!(matches!(
        store.get("20990101000000000"),
        Err(PipelineError::ReleaseNotFound(_))
    ));
    assert!(matches!(
        store.get("../etc"),
        Err(PipelineError::ReleaseNotFound(_))
    ));
    Ok(())
}

#[test]
fn changed_paths_round_trip_through_the_release() -> TestResult {
    let project = TestProject::new();
    let release = release_store(&project).create()?;

    assert!(release.changed_paths()?.is_empty());
    release.write_changes(&["content/a.json".to_string(), "content/b.json".to_string()])?;
    assert_eq!(
        release.changed_paths()?,
        vec!["content/a.json".to_string(), "content/b.json".to_string()]
    );
    Ok(())
}

#[test]
fn task_ids_lists_tasks_with_state() -> TestResult {
    let project = TestProject::new();
    let release = release_store(&project).create()?;

    complete_task(&project, &release, "export", 5);
    release.task("build-site").set_started()?;

    assert_eq!(release.task_ids()?, vec!["build-site", "export"]);
    assert!(release.has_running_task()?);
    Ok(())
}

#[test]
fn prune_keeps_newest_and_releases_with_running_tasks() -> TestResult {
    let project = TestProject::new();
    let store = release_store(&project);

    let mut ids = Vec::new();
    for _ in 0..4 {
        let release = store.create()?;
        ids.push(release.unique_id().to_string());
        project.clock.advance(Duration::from_secs(60));
    }

    // The oldest release still has a live build.
    let oldest = store.get(&ids[0])?;
    oldest.task("build-site").set_started()?;

    let removed = store.prune(2)?;
    assert_eq!(removed, vec![ids[1].clone()]);

    let remaining: Vec<String> = store
        .list()?
        .iter()
        .map(|r| r.unique_id().to_string())
        .collect();
    assert_eq!(remaining, vec![ids[0].clone(), ids[2].clone(), ids[3].clone()]);
    Ok(())
}
