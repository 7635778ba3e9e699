// tests/drivers.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, StageConfigBuilder};
use crate::common::{TestProject, TestResult, init_tracing};

use std::fs;

use stagehand::config::ConfigFile;
use stagehand::errors::PipelineError;
use stagehand::export::{ExportJobQueue, ExportOptions};
use stagehand::pipeline::Pipeline;
use stagehand::stage::{StageOutcome, StageRegistry};
use stagehand::types::{ExecutionContext, TaskStatus};
use stagehand_test_utils::fake_export::FakeExportJob;

const BUILD: &str = "mkdir -p \"$STAGEHAND_BUILD_DIR\" && \
                     cp -R \"$STAGEHAND_EXPORT_DIR/.\" \"$STAGEHAND_BUILD_DIR/\" && \
                     echo \"built $STAGEHAND_RELEASE_ID\"";

fn config(build_cmd: &str) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_stage(
            "site",
            StageConfigBuilder::new("shell-build").cmd(build_cmd).build(),
        )
        .with_stage(
            "docroot",
            StageConfigBuilder::new("copy-deploy")
                .after("site")
                .target_dir("public")
                .build(),
        )
        .with_stage(
            "cdn",
            StageConfigBuilder::new("shell-deploy")
                .after("site")
                .cmd("ls \"$STAGEHAND_BUILD_DIR\" > \"$STAGEHAND_RELEASE_DIR/deployed-$TARGET.txt\"")
                .env("TARGET", "edge")
                .build(),
        )
        .build()
}

fn pipeline(project: &TestProject, config: ConfigFile) -> Pipeline {
    project.pipeline(config, StageRegistry::with_builtin(), ExecutionContext::Background)
}

async fn export_page(pipeline: &Pipeline) -> Result<String, PipelineError> {
    let mut queue = ExportJobQueue::new();
    queue.add(
        "content",
        FakeExportJob::new("content")
            .writes("index.html", "<h1>hello</h1>")
            .into_job(),
        ExportOptions::default(),
    );
    let report = queue.drain(pipeline).await?;
    Ok(report.release_id.unwrap_or_default())
}

#[tokio::test]
async fn shell_build_then_copy_and_shell_deploy() -> TestResult {
    init_tracing();
    let project = TestProject::new();
    let pipeline = pipeline(&project, config(BUILD));

    let id = export_page(&pipeline).await?;
    let release = pipeline.releases().get(&id)?;

    let built = release.build_dir("site").join("index.html");
    assert_eq!(fs::read_to_string(built)?, "<h1>hello</h1>");

    let site = release.task("build-site");
    assert_eq!(site.status(), TaskStatus::Done);
    assert!(site.read_log()?.contains(&format!("stdout: built {id}")));

    let published = project.root().join("public").join("index.html");
    assert_eq!(fs::read_to_string(published)?, "<h1>hello</h1>");
    assert_eq!(release.task("deploy-docroot").status(), TaskStatus::Done);

    let listing = fs::read_to_string(release.dir().join("deployed-edge.txt"))?;
    assert_eq!(listing.trim(), "index.html");
    assert_eq!(release.task("deploy-cdn").status(), TaskStatus::Done);
    Ok(())
}

#[tokio::test]
async fn copy_deploy_replaces_the_previous_target() -> TestResult {
    let project = TestProject::new();
    let pipeline = pipeline(&project, config(BUILD));

    let stale = project.root().join("public").join("removed.html");
    fs::create_dir_all(project.root().join("public"))?;
    fs::write(&stale, "old")?;

    export_page(&pipeline).await?;
    assert!(!stale.exists());
    assert!(project.root().join("public").join("index.html").exists());
    Ok(())
}

#[tokio::test]
async fn failing_build_removes_partial_output() -> TestResult {
    let project = TestProject::new();
    let pipeline = pipeline(
        &project,
        config("mkdir -p \"$STAGEHAND_BUILD_DIR/partial\" && echo 'theme missing' >&2 && exit 7"),
    );

    let id = export_page(&pipeline).await?;
    let release = pipeline.releases().get(&id)?;
    let task = release.task("build-site");

    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(!release.build_dir("site").exists());
    let log = task.read_log()?;
    assert!(log.contains("stderr: theme missing"));
    assert!(log.contains("code 7"));

    assert_eq!(release.task("deploy-docroot").status(), TaskStatus::Unstarted);
    assert!(!project.root().join("public").exists());
    Ok(())
}

#[tokio::test]
async fn deploy_without_a_build_is_refused() -> TestResult {
    let project = TestProject::new();
    let pipeline = pipeline(&project, config(BUILD));
    let release = pipeline.releases().create()?;

    let err = pipeline
        .run_stage("docroot", Some(release.unique_id()), false)
        .await
        .expect_err("site never built");
    assert!(matches!(err, PipelineError::Precondition { .. }));
    assert_eq!(release.task("deploy-docroot").status(), TaskStatus::Unstarted);
    Ok(())
}

#[tokio::test]
async fn build_without_an_export_snapshot_is_refused() -> TestResult {
    let project = TestProject::new();
    let pipeline = pipeline(&project, config(BUILD));
    let release = pipeline.releases().create()?;
    // Export claims done but left no snapshot behind.
    release.task("export").set_started()?;
    release.task("export").set_done()?;

    let runner = pipeline.stage_runner("site")?;
    let err = runner
        .run(Some(release.unique_id()), false)
        .await
        .expect_err("no snapshot");
    assert!(matches!(err, PipelineError::Precondition { .. }));
    assert!(!release.task("build-site").is_started());

    // Once the snapshot is there the build goes through.
    fs::create_dir_all(release.export_dir())?;
    let outcome = runner.run(Some(release.unique_id()), false).await?;
    assert_eq!(outcome, StageOutcome::Success);
    Ok(())
}
