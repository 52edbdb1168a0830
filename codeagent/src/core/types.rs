//! Shared deterministic types for the plan/execute/review engine.
//!
//! These types define stable contracts between components. They carry no I/O
//! handles and serialize deterministically so run reports stay diffable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordinal task identifier, unique within one run.
pub type TaskId = u32;

/// What a task asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Shell command run in the working directory.
    Command,
    /// File content written under the working directory.
    FileWrite,
    /// Advisory note; recorded, never executed.
    Directive,
}

impl TaskKind {
    /// Map a free-form kind label onto a known kind.
    ///
    /// Unknown labels become `Directive` so one odd task never sinks a plan.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "command" | "cmd" | "shell" | "run" => TaskKind::Command,
            "filewrite" | "file" | "write" | "writefile" | "createfile" => TaskKind::FileWrite,
            _ => TaskKind::Directive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Command => "command",
            TaskKind::FileWrite => "file_write",
            TaskKind::Directive => "directive",
        }
    }
}

/// One atomic unit of plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: String,
    /// Ids of earlier tasks this task relies on. Always backward references.
    pub depends_on: Vec<TaskId>,
}

impl Task {
    /// One-line human label used in commit messages and logs.
    pub fn summary(&self) -> String {
        let first_line = self.payload.lines().next().unwrap_or("").trim();
        let mut label: String = first_line.chars().take(72).collect();
        if first_line.chars().count() > 72 {
            label.push_str("...");
        }
        format!("{} #{}: {}", self.kind.as_str(), self.id, label)
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// Parsed from a provider completion.
    Parsed,
    /// Hardcoded plan used when planning output was unusable.
    Fallback,
    /// Built from review issues during a fix cycle.
    Fix,
}

/// Ordered, validated task sequence. Never mutated after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub source: PlanSource,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn max_id(&self) -> Option<TaskId> {
        self.tasks.iter().map(|t| t.id).max()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Success,
    Failed,
    /// Final attempt of a task whose retries are exhausted.
    Skipped,
}

/// One record per attempt; a retried task has several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: ExecStatus,
    pub output: String,
    /// 1-indexed attempt number.
    pub attempt: u32,
}

/// Commit identifier (full SHA).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRef(pub String);

impl CommitRef {
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Association between one task outcome and the repository state after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// HEAD after the checkpoint; `None` only when the repository has no commits yet.
    pub commit: Option<CommitRef>,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    /// True when nothing was committed for this task.
    pub no_op: bool,
    /// Why the commit failed, when it did. Such checkpoints are always `no_op`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub description: String,
    /// Fix proposal; its id is provisional until it joins a fix plan.
    pub suggested_fix: Option<Task>,
}

/// Pass/fail judgment plus optional fixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub issues: Vec<Issue>,
}

impl ReviewVerdict {
    pub fn passed() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }
}

/// How a verdict was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    /// Parsed from the provider completion.
    Parsed,
    /// Completion was unusable; defaulted to passed.
    Defaulted,
    /// Provider call failed; verdict is `passed: false` with no issues.
    Unavailable,
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Executing,
    Checkpointed,
    Reviewing,
    Fixing,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }
}

/// Terminal outcome surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Done {
        /// Issues left open when the review budget ran out.
        unresolved: Vec<Issue>,
    },
    Aborted {
        reason: String,
    },
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done { .. })
    }
}
