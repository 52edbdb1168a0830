//! Task execution with bounded retries.
//!
//! A failing task is retried up to the configured limit with a fixed delay
//! between attempts. Once retries run out the final attempt is recorded as
//! `Skipped` and the caller moves on; one task never stops a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::file_payload::parse_file_payload;
use crate::core::types::{ExecStatus, ExecutionResult, Task, TaskKind};
use crate::io::config::ExecutionConfig;
use crate::io::shell::Shell;

/// Executes tasks against one working directory.
#[derive(Debug, Clone)]
pub struct TaskExecutor<S> {
    shell: S,
    workdir: PathBuf,
    command_timeout: Duration,
    retry_limit: u32,
    retry_delay: Duration,
}

impl<S: Shell> TaskExecutor<S> {
    pub fn new(shell: S, workdir: &Path, config: &ExecutionConfig) -> Self {
        Self {
            shell,
            workdir: workdir.to_path_buf(),
            command_timeout: config.command_timeout(),
            retry_limit: config.task_retry_limit,
            retry_delay: config.retry_delay(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run one attempt. Never fails: errors become a `Failed` result.
    #[instrument(skip_all, fields(task_id = task.id, kind = task.kind.as_str(), attempt))]
    pub fn execute(&self, task: &Task, attempt: u32) -> ExecutionResult {
        let outcome = match task.kind {
            TaskKind::Command => self.run_command(&task.payload),
            TaskKind::FileWrite => self.write_files(&task.payload),
            TaskKind::Directive => Ok((
                ExecStatus::Success,
                format!("advisory only, not executed: {}\n", task.payload.trim()),
            )),
        };
        let (status, output) = outcome.unwrap_or_else(|err| (ExecStatus::Failed, format!("{err:#}\n")));
        debug!(?status, "attempt finished");
        ExecutionResult {
            task_id: task.id,
            status,
            output,
            attempt,
        }
    }

    /// Run a task until it succeeds or `retry_limit + 1` attempts are spent.
    ///
    /// Every attempt is returned; when all fail, the last one is `Skipped`.
    pub fn execute_with_retry(&self, task: &Task) -> Vec<ExecutionResult> {
        let max_attempts = self.retry_limit.saturating_add(1);
        let mut attempts = Vec::new();
        for attempt in 1..=max_attempts {
            let mut result = self.execute(task, attempt);
            if result.status == ExecStatus::Success {
                info!(task_id = task.id, attempt, "task succeeded");
                attempts.push(result);
                break;
            }
            if attempt == max_attempts {
                warn!(task_id = task.id, attempts = attempt, "task skipped after retries");
                result.status = ExecStatus::Skipped;
                attempts.push(result);
                break;
            }
            warn!(task_id = task.id, attempt, "task failed, retrying");
            attempts.push(result);
            if !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }
        attempts
    }

    fn run_command(&self, command: &str) -> Result<(ExecStatus, String)> {
        let output = self
            .shell
            .run(command.trim(), &self.workdir, self.command_timeout)?;
        let status = if output.success() {
            ExecStatus::Success
        } else {
            ExecStatus::Failed
        };
        Ok((status, output.combined()))
    }

    fn write_files(&self, payload: &str) -> Result<(ExecStatus, String)> {
        let files = parse_file_payload(payload)?;
        let mut report = String::new();
        for file in files {
            let target = self.workdir.join(&file.path);
            if fs::read(&target).is_ok_and(|existing| existing == file.content.as_bytes()) {
                report.push_str(&format!("unchanged {}\n", file.path));
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(&target, &file.content)
                .with_context(|| format!("write {}", target.display()))?;
            report.push_str(&format!("wrote {} ({} bytes)\n", file.path, file.content.len()));
        }
        Ok((ExecStatus::Success, report))
    }
}
