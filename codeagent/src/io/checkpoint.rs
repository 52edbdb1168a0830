//! Version-control checkpoints after each task outcome.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::core::types::{Checkpoint, CommitRef, TaskId};
use crate::io::git::Git;

/// Append-only checkpointing of the working tree.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    git: Git,
    prefix: String,
    default_branch: String,
}

impl Checkpointer {
    pub fn new(workdir: &Path, prefix: &str, default_branch: &str) -> Self {
        Self {
            git: Git::new(workdir),
            prefix: prefix.to_string(),
            default_branch: default_branch.to_string(),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Make sure git works and the working directory is a repository.
    ///
    /// Initializes with the configured default branch on first use; a no-op
    /// for an existing repository.
    #[instrument(skip_all)]
    pub fn ensure_repo(&self) -> Result<()> {
        let version = self.git.version().context("git is not available")?;
        debug!(%version, "git available");
        if self.git.is_repo() {
            return Ok(());
        }
        info!(branch = %self.default_branch, "initializing repository");
        self.git
            .init(&self.default_branch)
            .with_context(|| format!("init repository in {}", self.git.workdir().display()))
    }

    /// Build the commit message for a task outcome.
    pub fn message(&self, description: &str) -> String {
        let description = description.trim();
        if self.prefix.is_empty() {
            description.to_string()
        } else {
            format!("{} {}", self.prefix, description)
        }
    }

    /// Stage everything and commit once for `task_id`.
    ///
    /// An empty delta is not an error: the checkpoint is recorded as a no-op
    /// pointing at the current HEAD.
    #[instrument(skip_all, fields(task_id))]
    pub fn commit(&self, description: &str, task_id: TaskId) -> Result<Checkpoint> {
        self.ensure_repo()?;
        self.git.add_all().context("stage working tree")?;
        let message = self.message(description);
        let committed = self
            .git
            .commit_staged(&message)
            .with_context(|| format!("commit checkpoint for task {task_id}"))?;
        let commit = self.git.head_sha()?.map(CommitRef);
        if committed {
            info!(
                task_id,
                commit = commit.as_ref().map(CommitRef::short).unwrap_or(""),
                "checkpoint committed"
            );
        } else {
            info!(task_id, "no changes to checkpoint");
        }
        Ok(Checkpoint {
            commit,
            task_id,
            timestamp: Utc::now(),
            no_op: !committed,
            error: None,
        })
    }

    /// No-op checkpoint for a task whose commit failed. HEAD is read on a
    /// best-effort basis.
    pub fn failed(&self, task_id: TaskId, err: &anyhow::Error) -> Checkpoint {
        Checkpoint {
            commit: self.git.head_sha().ok().flatten().map(CommitRef),
            task_id,
            timestamp: Utc::now(),
            no_op: true,
            error: Some(format!("{err:#}")),
        }
    }
}
