//! Shell boundary used by command tasks.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::instrument;

use crate::io::process::run_command_with_timeout;

/// Captured result of one shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// `None` when the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout and stderr in one block, as recorded in execution results.
    pub fn combined(&self) -> String {
        let mut text = String::new();
        if !self.stdout.is_empty() {
            text.push_str(&self.stdout);
            if !self.stdout.ends_with('\n') {
                text.push('\n');
            }
        }
        if !self.stderr.is_empty() {
            text.push_str("[stderr]\n");
            text.push_str(&self.stderr);
            if !self.stderr.ends_with('\n') {
                text.push('\n');
            }
        }
        if self.timed_out {
            text.push_str("[timed out]\n");
        } else if let Some(code) = self.exit_code
            && code != 0
        {
            text.push_str(&format!("[exit code {code}]\n"));
        }
        text
    }
}

/// Abstraction over command execution.
pub trait Shell {
    /// Run `command` in `cwd`, bounded by `timeout`. Errors only when the
    /// command could not be started at all.
    fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutput>;
}

impl<S: Shell + ?Sized> Shell for &S {
    fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutput> {
        (**self).run(command, cwd, timeout)
    }
}

/// Shell backed by `sh -c`.
#[derive(Debug, Clone)]
pub struct SystemShell {
    output_limit_bytes: usize,
}

impl SystemShell {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl Shell for SystemShell {
    #[instrument(skip_all, fields(cwd = %cwd.display()))]
    fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(cwd);
        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)
            .with_context(|| format!("run shell command `{command}`"))?;
        Ok(ShellOutput {
            exit_code: output.exit_code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        })
    }
}
