//! Git adapter for checkpointing.
//!
//! A small, explicit wrapper around `git` subprocess calls. Only the handful of
//! operations the checkpointer needs are exposed; nothing here rewrites history.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Identity used when the repository has no committer configured.
const FALLBACK_NAME: &str = "codeagent";
const FALLBACK_EMAIL: &str = "codeagent@localhost";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    /// True when the index side of the entry records a change.
    pub fn is_staged(&self) -> bool {
        let index = self.code.chars().next().unwrap_or(' ');
        index != ' ' && index != '?'
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the `git --version` line; fails when git is not installed.
    pub fn version(&self) -> Result<String> {
        let out = self.run_capture(&["--version"])?;
        Ok(out.trim().to_string())
    }

    /// True when the working directory itself is a repository root.
    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Initialize a repository whose unborn HEAD points at `default_branch`.
    #[instrument(skip_all, fields(default_branch))]
    pub fn init(&self, default_branch: &str) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "initializing repository");
        self.run_checked(&["init", "--quiet"])?;
        let head_ref = format!("refs/heads/{default_branch}");
        self.run_checked(&["symbolic-ref", "HEAD", &head_ref])?;
        Ok(())
    }

    /// Current branch name, valid on an unborn branch too.
    pub fn current_branch(&self) -> Result<String> {
        let out = self
            .run_capture(&["symbolic-ref", "--short", "HEAD"])
            .context("detached HEAD or unreadable HEAD")?;
        Ok(out.trim().to_string())
    }

    /// True once at least one commit exists.
    pub fn has_commits(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.status.success())
    }

    /// Full SHA of HEAD, or `None` before the first commit.
    pub fn head_sha(&self) -> Result<Option<String>> {
        if !self.has_commits()? {
            return Ok(None);
        }
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(Some(out.trim().to_string()))
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> Result<usize> {
        if !self.has_commits()? {
            return Ok(0);
        }
        let out = self.run_capture(&["rev-list", "--count", "HEAD"])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse commit count '{}'", out.trim()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Paths staged for the next commit.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .filter(StatusEntry::is_staged)
            .map(|entry| entry.path)
            .collect())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        let staged = self.staged_paths()?;
        if staged.is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!(staged = staged.len(), "committing staged changes");
        let mut args: Vec<&str> = Vec::new();
        let name_arg = format!("user.name={FALLBACK_NAME}");
        let email_arg = format!("user.email={FALLBACK_EMAIL}");
        if !self.identity_configured()? {
            args.extend(["-c", name_arg.as_str(), "-c", email_arg.as_str()]);
        }
        args.extend(["commit", "--quiet", "--no-verify", "-m", message]);
        self.run_checked(&args)?;
        Ok(true)
    }

    fn identity_configured(&self) -> Result<bool> {
        let name = self.run(&["config", "--get", "user.name"])?;
        let email = self.run(&["config", "--get", "user.email"])?;
        Ok(name.status.success() && email.status.success())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
        assert!(!e.is_staged());
    }

    #[test]
    fn parses_added_line_as_staged() {
        let e = parse_status_line("A  src/main.rs").expect("parse");
        assert_eq!(e.path, "src/main.rs");
        assert!(e.is_staged());
    }

    #[test]
    fn unstaged_modification_is_not_staged() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert!(!e.is_staged());
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn init_sets_default_branch_and_commits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert!(!git.is_repo());
        git.init("trunk").expect("init");
        assert!(git.is_repo());
        assert_eq!(git.current_branch().expect("branch"), "trunk");
        assert_eq!(git.head_sha().expect("head"), None);

        std::fs::write(temp.path().join("a.txt"), "a\n").expect("write");
        git.add_all().expect("add");
        assert!(git.commit_staged("first").expect("commit"));
        assert_eq!(git.commit_count().expect("count"), 1);
        assert!(git.head_sha().expect("head").is_some());

        git.add_all().expect("add");
        assert!(!git.commit_staged("nothing").expect("commit"));
        assert_eq!(git.commit_count().expect("count"), 1);
    }
}
