// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `stagehand`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Export content into releases, then build and deploy them stage by stage.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Stagehand.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Stagehand.toml", global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGEHAND_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Parse + validate the config and print the stage graph.
    Check,

    /// Run the configured export jobs as one batch and start the stages
    /// after `export` if anything changed.
    Export {
        /// Only run these export jobs (repeatable). Default: all of them.
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Run downstream stages in this process instead of detaching them.
        #[arg(long)]
        inline: bool,
    },

    /// Run one stage in this process, then everything downstream of it.
    ///
    /// This is also what detached stages run.
    RunStage {
        stage: String,

        /// Release to run against. Default: the newest release.
        #[arg(long, value_name = "ID")]
        release: Option<String>,

        /// Run even if the stage is already done for the release.
        #[arg(long)]
        force: bool,
    },

    /// Show task progress for a release.
    Status {
        /// Release to inspect. Default: the newest release.
        #[arg(long, value_name = "ID")]
        release: Option<String>,
    },

    /// Delete all but the newest `keep_releases` releases.
    Prune,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
