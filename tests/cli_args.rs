// tests/cli_args.rs

use std::path::PathBuf;

use clap::Parser;
use stagehand::cli::{CliArgs, Command, LogLevel};

#[test]
fn run_stage_accepts_what_the_fork_launcher_passes() {
    let args = CliArgs::try_parse_from([
        "stagehand",
        "--config",
        "/srv/site/Stagehand.toml",
        "run-stage",
        "site",
        "--release",
        "20260101120000000",
        "--force",
    ])
    .expect("valid arguments");

    assert_eq!(args.config, PathBuf::from("/srv/site/Stagehand.toml"));
    match args.command {
        Command::RunStage {
            stage,
            release,
            force,
        } => {
            assert_eq!(stage, "site");
            assert_eq!(release.as_deref(), Some("20260101120000000"));
            assert!(force);
        }
        other => panic!("Expected run-stage, got: {:?}", other),
    }
}

#[test]
fn export_defaults_to_all_jobs_and_detached_stages() {
    let args = CliArgs::try_parse_from(["stagehand", "export"]).expect("valid arguments");

    assert_eq!(args.config, PathBuf::from("Stagehand.toml"));
    assert!(args.log_level.is_none());
    assert!(matches!(
        args.command,
        Command::Export { ref jobs, inline: false } if jobs.is_empty()
    ));
}

#[test]
fn global_flags_work_after_the_subcommand() {
    let args = CliArgs::try_parse_from([
        "stagehand",
        "export",
        "--job",
        "content",
        "--job",
        "redirects",
        "--inline",
        "--log-level",
        "debug",
        "--config",
        "other.toml",
    ])
    .expect("valid arguments");

    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert_eq!(args.config, PathBuf::from("other.toml"));
    match args.command {
        Command::Export { jobs, inline } => {
            assert_eq!(jobs, vec!["content", "redirects"]);
            assert!(inline);
        }
        other => panic!("Expected export, got: {:?}", other),
    }
}

#[test]
fn subcommand_is_required() {
    assert!(CliArgs::try_parse_from(["stagehand"]).is_err());
    assert!(CliArgs::try_parse_from(["stagehand", "run-stage"]).is_err());
}

fn write_config(dir: &std::path::Path, export_cmd: &str) -> std::io::Result<PathBuf> {
    let path = dir.join("Stagehand.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[export.content]
cmd = "{export_cmd}"

[stage.site]
driver = "shell-build"
cmd = "mkdir -p \"$STAGEHAND_BUILD_DIR\""
sync = true
"#
        ),
    )?;
    Ok(path)
}

#[tokio::test]
async fn request_export_runs_the_batch_and_sync_stages() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path(), "echo hello > index.html")?;
    let args = CliArgs::try_parse_from([
        "stagehand".as_ref(),
        "--config".as_ref(),
        config.as_os_str(),
        "export".as_ref(),
    ])?;

    stagehand::run(args).await?;

    let releases = dir.path().join(".stagehand").join("releases");
    let ids: Vec<_> = std::fs::read_dir(&releases)?.collect::<Result<_, _>>()?;
    assert_eq!(ids.len(), 1);
    let release = ids[0].path();
    assert!(release.join("export").join("index.html").is_file());
    assert!(std::fs::read_to_string(release.join("build-site").join("state.toml"))?.contains("done"));
    Ok(())
}

#[tokio::test]
async fn request_export_failure_is_reported_and_fails_the_command()
-> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path(), "exit 3")?;
    let args = CliArgs::try_parse_from([
        "stagehand".as_ref(),
        "--config".as_ref(),
        config.as_os_str(),
        "export".as_ref(),
    ])?;

    let err = stagehand::run(args).await.expect_err("exporter exits 3");
    assert_eq!(err.to_string(), "export failed");
    Ok(())
}
