// tests/stage_runner.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{TestProject, TestResult, complete_task, init_tracing, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use stagehand::config::ConfigFile;
use stagehand::errors::PipelineError;
use stagehand::exec::Launcher;
use stagehand::lock::lock_name;
use stagehand::pipeline::Pipeline;
use stagehand::stage::StageOutcome;
use stagehand::types::{ExecutionContext, TaskStatus};
use stagehand_test_utils::fake_stage::{FakeBehaviour, FakeStages};
use tokio::sync::Notify;

fn site_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage("site", StageConfigBuilder::new("fake-build").build())
        .with_stage(
            "cdn",
            StageConfigBuilder::new("fake-deploy")
                .after("site")
                .sync(true)
                .build(),
        )
        .build()
}

fn background(project: &TestProject, fakes: &FakeStages) -> Pipeline {
    project.pipeline(site_config(), fakes.registry(), ExecutionContext::Background)
}

#[tokio::test]
async fn successful_run_marks_done_and_frees_the_lock() -> TestResult {
    init_tracing();
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = background(&project, &fakes);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);

    let runner = pipeline.stage_runner("site")?;
    let outcome = runner.run(None, false).await?;

    assert_eq!(outcome, StageOutcome::Success);
    let task = release.task("build-site");
    assert_eq!(task.status(), TaskStatus::Done);
    assert!(task.read_log()?.contains("fake site running"));
    assert!(task.read_log()?.contains("checking preconditions"));
    assert!(!pipeline.locks().is_held(&lock_name("live", "site")));
    Ok(())
}

#[tokio::test]
async fn silent_stage_stays_running_past_the_staleness_window() -> TestResult {
    init_tracing();
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let entered = Arc::new(Notify::new());
    let release_gate = Arc::new(Notify::new());
    fakes.script(
        "site",
        FakeBehaviour::Gate {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release_gate),
        },
    );
    // 3 s window, so the ticker beats every second.
    let config = ConfigFileBuilder::new()
        .with_staleness_secs(3)
        .with_stage("site", StageConfigBuilder::new("fake-build").build())
        .build();
    let pipeline = project.pipeline(config, fakes.registry(), ExecutionContext::Background);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);
    let id = release.unique_id().to_string();

    let runner = pipeline.stage_runner("site")?;
    let handle = tokio::spawn(async move { runner.run(Some(&id), false).await });
    with_timeout(entered.notified()).await;

    let task = release.task("build-site");
    project.clock.advance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(task.is_running());
    assert_eq!(task.status(), TaskStatus::Running);

    release_gate.notify_one();
    let outcome = with_timeout(handle).await??;
    assert_eq!(outcome, StageOutcome::Success);
    assert_eq!(task.status(), TaskStatus::Done);
    Ok(())
}

#[tokio::test]
async fn done_stage_is_skipped_unless_forced() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = background(&project, &fakes);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);
    let id = release.unique_id();
    let runner = pipeline.stage_runner("site")?;

    assert_eq!(runner.run(Some(id), false).await?, StageOutcome::Success);
    assert_eq!(runner.run(Some(id), false).await?, StageOutcome::Skipped);
    assert_eq!(runner.run(Some(id), true).await?, StageOutcome::Success);
    assert_eq!(fakes.runs(), vec!["site", "site"]);
    Ok(())
}

#[tokio::test]
async fn missing_upstream_is_a_precondition_error_not_a_failure() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = background(&project, &fakes);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);

    // cdn runs after site, which never ran.
    let runner = pipeline.stage_runner("cdn")?;
    let err = runner
        .run(Some(release.unique_id()), false)
        .await
        .expect_err("site is not done");

    assert!(matches!(err, PipelineError::Precondition { ref stage, .. } if stage == "cdn"));
    assert_eq!(release.task("deploy-cdn").status(), TaskStatus::Unstarted);
    assert!(fakes.runs().is_empty());
    assert!(fakes.calls().contains(&"rollback:cdn".to_string()));
    assert!(!pipeline.locks().is_held(&lock_name("live", "cdn")));
    Ok(())
}

#[tokio::test]
async fn body_precondition_rejection_does_not_mark_failed() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    fakes.script(
        "site",
        FakeBehaviour::RejectPrecondition("no templates".to_string()),
    );
    let pipeline = background(&project, &fakes);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);

    let runner = pipeline.stage_runner("site")?;
    let err = runner.run(None, false).await.expect_err("rejected");

    assert!(matches!(err, PipelineError::Precondition { .. }));
    assert!(!release.task("build-site").is_failed());
    assert!(!release.task("build-site").is_started());
    Ok(())
}

#[tokio::test]
async fn body_failure_rolls_back_and_marks_failed() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    fakes.script("site", FakeBehaviour::Fail("template error".to_string()));
    let pipeline = background(&project, &fakes);

    let release = pipeline.releases().create()?;
    complete_task(&project, &release, "export", 1);

    let runner = pipeline.stage_runner("site")?;
    let outcome = runner.run(None, false).await?;

    let StageOutcome::Failed(reason) = outcome else {
        panic!("expected a failed outcome, got {outcome:?}");
    };
    assert!(reason.contains("template error"));

    let task = release.task("build-site");
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.failure().is_some_and(|f| f.contains("template error")));
    assert!(task.read_log()?.contains("template error"));
    assert_eq!(fakes.calls().last().map(String::as_str), Some("rollback:site"));
    assert!(!pipeline.locks().is_held(&lock_name("live", "site")));

    // A failed run can be retried and the failure clears.
    fakes.script("site", FakeBehaviour::Succeed);
    assert_eq!(runner.run(None, false).await?, StageOutcome::Success);
    assert_eq!(task.status(), TaskStatus::Done);
    assert_eq!(task.failure(), None);
    Ok(())
}

#[tokio::test]
async fn failed_outcome_converts_into_an_error_on_request() -> TestResult {
    let outcome = StageOutcome::Failed("boom".to_string());
    let err = outcome.into_result("site").expect_err("failed is an error");
    assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "site"));

    assert_eq!(
        StageOutcome::Busy.into_result("site")?,
        StageOutcome::Busy
    );
    Ok(())
}

#[tokio::test]
async fn run_without_any_release_is_an_error() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = background(&project, &fakes);

    let runner = pipeline.stage_runner("site")?;
    let err = runner.run(None, false).await.expect_err("no release");
    assert!(matches!(err, PipelineError::ReleaseNotFound(_)));
    Ok(())
}

#[test]
fn execution_context_decides_between_fork_and_inline() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();

    let request = project.pipeline(site_config(), fakes.registry(), ExecutionContext::Request);
    assert!(request.stage_runner("site")?.is_async());
    // `sync = true` stages run inline even from a request.
    assert!(!request.stage_runner("cdn")?.is_async());

    let worker = background(&project, &fakes);
    assert!(!worker.stage_runner("site")?.is_async());
    assert!(!worker.stage_runner("cdn")?.is_async());
    Ok(())
}

#[tokio::test]
async fn forking_without_a_launcher_is_a_config_error() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let pipeline = project.pipeline(site_config(), fakes.registry(), ExecutionContext::Request);
    pipeline.releases().create()?;

    let runner = pipeline.stage_runner("site")?;
    let err = runner.init(None, false).await.expect_err("no launcher");
    assert!(matches!(err, PipelineError::ConfigError(_)));
    Ok(())
}

#[tokio::test]
async fn init_detaches_through_the_launcher() -> TestResult {
    let project = TestProject::new();
    let fakes = FakeStages::new();
    let log_dir = project.root().join("logs");
    let launcher = Launcher::new("true", project.root().join("Stagehand.toml"), &log_dir);
    let pipeline = project
        .pipeline(site_config(), fakes.registry(), ExecutionContext::Request)
        .with_launcher(launcher);

    let release = pipeline.releases().create()?;
    let runner = pipeline.stage_runner("site")?;
    let outcome = runner.init(Some(release.unique_id()), false).await?;

    assert_eq!(outcome, StageOutcome::Detached);
    // Nothing ran in this process.
    assert!(fakes.runs().is_empty());
    assert!(log_dir.is_dir());
    Ok(())
}
