// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] opens shell commands with piped streams and captures their
//!   result (`CommandRunner`, `CliCommandResult`).
//! - [`fork`] detaches a stage into a separate OS process (`Launcher`).

pub mod command;
pub mod fork;

pub use command::{CliCommandResult, CommandHandle, CommandRunner};
pub use fork::{Launcher, shell_quote};
