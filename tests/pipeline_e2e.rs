// tests/pipeline_e2e.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{TestProject, TestResult, init_tracing};

use std::fs;

use stagehand::config::ConfigFile;
use stagehand::export::{ExportJobQueue, ExportOptions};
use stagehand::pipeline::{Pipeline, StageReport};
use stagehand::stage::StageOutcome;
use stagehand::types::{ExecutionContext, TaskStatus};
use stagehand_test_utils::fake_export::FakeExportJob;
use stagehand_test_utils::fake_stage::{FakeBehaviour, FakeStages};

fn build_then_deploy() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage(
            "site",
            StageConfigBuilder::new("fake-build")
                .trigger(&["content/**"])
                .exclude("content/drafts/**")
                .build(),
        )
        .with_stage(
            "cdn",
            StageConfigBuilder::new("fake-deploy").after("site").build(),
        )
        .build()
}

fn pipeline(project: &TestProject, fakes: &FakeStages, config: ConfigFile) -> Pipeline {
    project.pipeline(config, fakes.registry(), ExecutionContext::Background)
}

fn stages(reports: &[StageReport]) -> Vec<(&str, &StageOutcome)> {
    reports
        .iter()
        .map(|r| (r.stage.as_str(), &r.outcome))
        .collect()
}

fn queue_of(job: FakeExportJob) -> ExportJobQueue {
    let mut queue = ExportJobQueue::new();
    queue.add("content", job.into_job(), ExportOptions::default());
    queue
}

#[tokio::test]
async fn export_with_matching_change_builds_then_deploys() -> TestResult {
    init_tracing();
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let mut queue = queue_of(FakeExportJob::new("content").writes("content/node/1.json", "{}"));
    let report = queue.drain(&pipeline).await?;

    assert_eq!(report.outcome, StageOutcome::Success);
    assert!(queue.is_empty());
    assert_eq!(
        stages(&report.stages),
        vec![("site", &StageOutcome::Success), ("cdn", &StageOutcome::Success)]
    );
    assert_eq!(fakes.runs(), vec!["site", "cdn"]);

    let id = report.release_id.expect("release kept");
    let release = pipeline.releases().get(&id)?;
    assert_eq!(release.task("export").status(), TaskStatus::Done);
    assert_eq!(release.task("build-site").status(), TaskStatus::Done);
    assert_eq!(release.task("deploy-cdn").status(), TaskStatus::Done);
    assert!(!release.task("build-site").is_failed());
    assert_eq!(release.changed_paths()?, vec!["content/node/1.json"]);

    // The release holds its own copy of the export tree.
    let snapshot = release.export_dir().join("content/node/1.json");
    assert_eq!(fs::read_to_string(snapshot)?, "{}");

    // The stage runs saw the release they were started for.
    assert!(fakes.calls().contains(&format!("run:site:{id}")));
    assert!(fakes.calls().contains(&format!("run:cdn:{id}")));
    Ok(())
}

#[tokio::test]
async fn export_without_changes_creates_no_release_and_runs_nothing() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let mut queue = queue_of(FakeExportJob::new("content"));
    let report = queue.drain(&pipeline).await?;

    assert_eq!(report.outcome, StageOutcome::Skipped);
    assert_eq!(report.release_id, None);
    assert!(report.group.is_empty());
    assert!(report.stages.is_empty());
    assert!(fakes.calls().is_empty());
    assert!(pipeline.releases().list()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn changes_outside_the_trigger_keep_the_release_but_start_nothing() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let mut queue = queue_of(
        FakeExportJob::new("content")
            .writes("redirects.json", "[]")
            .writes("content/drafts/wip.json", "{}"),
    );
    let report = queue.drain(&pipeline).await?;

    assert_eq!(report.outcome, StageOutcome::Success);
    assert!(report.stages.is_empty());
    assert!(fakes.runs().is_empty());

    let release = pipeline.releases().get(&report.release_id.expect("release kept"))?;
    assert_eq!(release.task("export").status(), TaskStatus::Done);
    assert_eq!(release.task("build-site").status(), TaskStatus::Unstarted);
    assert_eq!(release.task("deploy-cdn").status(), TaskStatus::Unstarted);
    Ok(())
}

#[tokio::test]
async fn failed_build_does_not_start_the_deploy() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    fakes.script("site", FakeBehaviour::Fail("hugo crashed".to_string()));
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let mut queue = queue_of(FakeExportJob::new("content").writes("content/a.json", "{}"));
    let report = queue.drain(&pipeline).await?;

    assert_eq!(report.stages.len(), 1);
    assert!(matches!(report.stages[0].outcome, StageOutcome::Failed(_)));
    assert_eq!(fakes.runs(), vec!["site"]);

    let release = pipeline.releases().get(&report.release_id.expect("release kept"))?;
    assert_eq!(release.task("build-site").status(), TaskStatus::Failed);
    assert_eq!(release.task("deploy-cdn").status(), TaskStatus::Unstarted);
    Ok(())
}

#[tokio::test]
async fn diamond_dependent_runs_once_after_both_upstreams() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let config = ConfigFileBuilder::new()
        .with_stage("html", StageConfigBuilder::new("fake-build").build())
        .with_stage("search", StageConfigBuilder::new("fake-build").build())
        .with_stage(
            "cdn",
            StageConfigBuilder::new("fake-deploy")
                .after("html")
                .after("search")
                .build(),
        )
        .build();
    let pipeline = pipeline(&project, &fakes, config);

    let mut queue = queue_of(FakeExportJob::new("content").writes("content/a.json", "{}"));
    let report = queue.drain(&pipeline).await?;

    assert_eq!(fakes.runs(), vec!["html", "search", "cdn"]);
    assert_eq!(
        stages(&report.stages),
        vec![
            ("html", &StageOutcome::Success),
            ("search", &StageOutcome::Success),
            ("cdn", &StageOutcome::Success),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn diamond_dependent_waits_when_one_upstream_fails() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    fakes.script("search", FakeBehaviour::Fail("index too large".to_string()));
    let config = ConfigFileBuilder::new()
        .with_stage("html", StageConfigBuilder::new("fake-build").build())
        .with_stage("search", StageConfigBuilder::new("fake-build").build())
        .with_stage(
            "cdn",
            StageConfigBuilder::new("fake-deploy")
                .after("html")
                .after("search")
                .build(),
        )
        .build();
    let pipeline = pipeline(&project, &fakes, config);

    let mut queue = queue_of(FakeExportJob::new("content").writes("content/a.json", "{}"));
    queue.drain(&pipeline).await?;

    assert_eq!(fakes.runs(), vec!["html", "search"]);
    Ok(())
}

#[tokio::test]
async fn run_stage_by_hand_continues_downstream() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let mut queue = ExportJobQueue::new();
    queue.add(
        "content",
        FakeExportJob::new("content")
            .writes("content/a.json", "{}")
            .into_job(),
        ExportOptions {
            trigger_downstream: false,
        },
    );
    let report = queue.drain(&pipeline).await?;
    assert!(report.stages.is_empty());
    assert!(fakes.runs().is_empty());

    let reports = pipeline.run_stage("site", None, false).await?;
    assert_eq!(
        stages(&reports),
        vec![("site", &StageOutcome::Success), ("cdn", &StageOutcome::Success)]
    );

    // Re-running a finished stage skips and does not chain.
    let again = pipeline.run_stage("site", None, false).await?;
    assert_eq!(stages(&again), vec![("site", &StageOutcome::Skipped)]);
    assert_eq!(fakes.runs(), vec!["site", "cdn"]);
    Ok(())
}

#[tokio::test]
async fn each_export_makes_a_new_release() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = pipeline(&project, &fakes, build_then_deploy());

    let first = queue_of(FakeExportJob::new("content").writes("content/a.json", "1"))
        .drain(&pipeline)
        .await?;
    project.clock.advance(std::time::Duration::from_secs(5));
    let second = queue_of(FakeExportJob::new("content").writes("content/a.json", "2"))
        .drain(&pipeline)
        .await?;

    let first_id = first.release_id.expect("first release");
    let second_id = second.release_id.expect("second release");
    assert_ne!(first_id, second_id);
    assert_eq!(
        pipeline.releases().current()?.map(|r| r.unique_id().to_string()),
        Some(second_id.clone())
    );

    // Older releases keep their own snapshot.
    let old = pipeline.releases().get(&first_id)?;
    assert_eq!(fs::read_to_string(old.export_dir().join("content/a.json"))?, "1");
    assert_eq!(fakes.runs(), vec!["site", "cdn", "site", "cdn"]);
    Ok(())
}
