// src/main.rs

use std::process::ExitCode;

use stagehand::errors::PipelineError;
use stagehand::{cli, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("stagehand error: {err:?}");
            exit_code(&err)
        }
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

/// 2 for a config the pipeline cannot work with, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<PipelineError>() {
        Some(
            PipelineError::ConfigError(_)
            | PipelineError::TomlError(_)
            | PipelineError::StageCycle(_)
            | PipelineError::UnknownDriver { .. },
        ) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
