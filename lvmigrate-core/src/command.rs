//! Synchronous-from-the-caller's-view invocation of external tools.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MigrationError, Result};

/// Stands in for stderr in [`MigrationError::ToolFailed`] when the tool wrote
/// it straight to the terminal.
pub(crate) const STDERR_ON_TERMINAL: &str = "<stderr shown on terminal>";

/// A single external tool invocation.
#[derive(Debug, Clone)]
pub(crate) struct ToolCommand {
    program: String,
    args: Vec<String>,
    inherit_stdin: bool,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inherit_stdin: false,
            timeout: None,
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Let the tool prompt the operator on the controlling terminal. Stdin and
    /// stderr are inherited, so stderr is not captured for error reports.
    pub(crate) fn interactive(mut self) -> Self {
        self.inherit_stdin = true;
        self
    }

    /// Fail with [`MigrationError::ToolTimeout`] if the tool runs longer.
    pub(crate) fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn args_display(&self) -> String {
        self.args.join(" ")
    }

    /// Run to completion and return stdout. Non-zero exit is an error carrying
    /// stderr.
    pub(crate) async fn output(&self) -> Result<String> {
        debug!(program = %self.program, args = %self.args_display(), "Running command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if self.inherit_stdin {
            cmd.stdin(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null());
        }

        let running = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, running)
                .await
                .map_err(|_| MigrationError::ToolTimeout {
                    program: self.program.clone(),
                    args: self.args_display(),
                    secs: limit.as_secs(),
                })?,
            None => running.await,
        }
        .map_err(|e| MigrationError::ToolLaunch {
            program: self.program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let stderr = if self.inherit_stdin {
                STDERR_ON_TERMINAL.to_string()
            } else {
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            };
            return Err(MigrationError::ToolFailed {
                program: self.program.clone(),
                args: self.args_display(),
                status: output.status.to_string(),
                stderr,
            });
        }

        String::from_utf8(output.stdout).map_err(|e| MigrationError::ToolOutput {
            program: self.program.clone(),
            args: self.args_display(),
            reason: e.to_string(),
        })
    }
}
