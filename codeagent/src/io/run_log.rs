//! Per-run artifacts under `.codeagent/runs/<run-id>/`.
//!
//! `.codeagent/` carries its own `.gitignore` so nothing written here ever
//! lands in a checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::ExecutionResult;

pub const STATE_DIR: &str = ".codeagent";

/// Run identifier derived from the start time, e.g. `run-20250101120000`.
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    format!("run-{}", started_at.format("%Y%m%d%H%M%S"))
}

/// Handle to one run's log directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
}

impl RunLog {
    /// Create the run directory. A second run started within the same second
    /// gets a numeric suffix.
    pub fn create(workdir: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        let state_dir = workdir.join(STATE_DIR);
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        write_text(&state_dir.join(".gitignore"), "*\n")?;

        let runs_dir = state_dir.join("runs");
        let base = run_id_for(started_at);
        let mut run_id = base.clone();
        let mut suffix = 2;
        while runs_dir.join(&run_id).exists() {
            run_id = format!("{base}-{suffix}");
            suffix += 1;
        }
        let dir = runs_dir.join(&run_id);
        fs::create_dir_all(dir.join("tasks"))
            .with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn attempt_path(&self, result: &ExecutionResult) -> PathBuf {
        self.dir
            .join("tasks")
            .join(format!("{}-{}.log", result.task_id, result.attempt))
    }

    /// Record the captured output of one attempt.
    pub fn write_attempt(&self, result: &ExecutionResult) -> Result<PathBuf> {
        let path = self.attempt_path(result);
        let mut buf = format!(
            "task {} attempt {}: {:?}\n\n",
            result.task_id, result.attempt, result.status
        );
        buf.push_str(&result.output);
        write_text(&path, &buf)?;
        Ok(path)
    }

    /// Keep a provider exchange (`plan`, `review-1`, ...) for later inspection.
    pub fn write_exchange(&self, name: &str, prompt: &str, completion: Option<&str>) -> Result<()> {
        write_text(&self.dir.join(format!("{name}.prompt.md")), prompt)?;
        if let Some(completion) = completion {
            write_text(&self.dir.join(format!("{name}.completion.md")), completion)?;
        }
        Ok(())
    }

    pub fn write_report<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        let path = self.dir.join("report.json");
        write_json(&path, report)?;
        Ok(path)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_text(path, &buf)
}
