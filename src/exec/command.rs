// src/exec/command.rs

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::errors::{PipelineError, Result};

/// Captured result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliCommandResult {
    return_code: i32,
    stdout: String,
    stderr: String,
}

impl CliCommandResult {
    pub fn new(return_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            return_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

/// Opens shell commands as OS processes.
///
/// One attempt per call; callers decide whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Start `cmd` through the platform shell.
    ///
    /// - `cwd` must be absolute when given; `None` keeps the current directory.
    /// - `env` is merged over the parent environment.
    pub fn open(
        &self,
        cmd: &str,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandHandle> {
        let mut command = shell_command(cmd);

        if let Some(dir) = cwd {
            if !dir.is_absolute() {
                return Err(launch_error(
                    cmd,
                    format!("working directory must be absolute: {}", dir.display()),
                ));
            }
            command.current_dir(dir);
        }

        command
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = %cmd, cwd = ?cwd, "opening process");

        let child = command
            .spawn()
            .map_err(|e| launch_error(cmd, format!("spawning process: {e}")))?;

        Ok(CommandHandle {
            command: cmd.to_string(),
            child,
        })
    }

    /// Convenience: `open` followed by `execute`.
    pub async fn run(
        &self,
        cmd: &str,
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
        stdin: Option<&[u8]>,
    ) -> Result<CliCommandResult> {
        self.open(cmd, cwd, env)?.execute(stdin).await
    }
}

/// A running process with its standard streams still attached.
#[derive(Debug)]
pub struct CommandHandle {
    command: String,
    child: Child,
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.child.stdin.as_mut()
    }

    pub fn stdout(&mut self) -> Option<&mut ChildStdout> {
        self.child.stdout.as_mut()
    }

    pub fn stderr(&mut self) -> Option<&mut ChildStderr> {
        self.child.stderr.as_mut()
    }

    /// Feed `input` to stdin, drain stdout and stderr to EOF, then reap the
    /// process.
    ///
    /// All three pipes are serviced concurrently so a child that fills one
    /// pipe's OS buffer cannot block on us. Every pipe is closed when this
    /// returns, including on error.
    pub async fn execute(mut self, input: Option<&[u8]>) -> Result<CliCommandResult> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (written, out, err) = tokio::join!(
            write_stdin(stdin, input),
            read_to_end(stdout),
            read_to_end(stderr),
        );

        written?;
        let out = out?;
        let err = err?;

        let status = self.child.wait().await?;
        let code = status.code().unwrap_or(-1);

        info!(cmd = %self.command, exit_code = code, "process exited");

        Ok(CliCommandResult::new(
            code,
            String::from_utf8_lossy(&out),
            String::from_utf8_lossy(&err),
        ))
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn write_stdin(stdin: Option<ChildStdin>, input: Option<&[u8]>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    if let Some(data) = input {
        match stdin.write_all(data).await {
            // The child may exit without reading its input.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
            other => other?,
        }
    }

    match stdin.shutdown().await {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

async fn read_to_end<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn launch_error(cmd: &str, reason: String) -> PipelineError {
    PipelineError::Launch {
        command: cmd.to_string(),
        code: None,
        stdout: String::new(),
        stderr: reason,
    }
}
