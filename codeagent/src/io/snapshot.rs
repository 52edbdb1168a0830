//! Bounded view of the working tree handed to the reviewer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::io::config::ReviewConfig;

const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    "__pycache__",
    "dist",
    "build",
    "target",
];

/// One file in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    /// Path relative to the working directory, `/`-separated.
    pub path: String,
    pub bytes: u64,
    /// Leading content; empty for non-UTF-8 files.
    pub excerpt: String,
    pub excerpt_truncated: bool,
    pub binary: bool,
}

/// Project state submitted for review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectSnapshot {
    pub files: Vec<FileSummary>,
    /// True when more files existed than the cap allowed.
    pub truncated: bool,
    /// Files left out for size.
    pub oversized: Vec<String>,
    /// Entries that vanished or could not be read during the walk.
    pub unreadable: Vec<String>,
}

impl ProjectSnapshot {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path listing with sizes, one per line.
    pub fn tree(&self) -> String {
        self.files
            .iter()
            .map(|f| format!("{} ({} bytes)", f.path, f.bytes))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Walk `root` and collect file excerpts within the review limits.
///
/// Entries are visited in file-name order so the same tree always yields the
/// same snapshot. Only an unreadable `root` is an error; entries that fail
/// mid-walk are listed in `unreadable` and skipped.
pub fn take_snapshot(root: &Path, limits: &ReviewConfig) -> Result<ProjectSnapshot> {
    let mut snapshot = ProjectSnapshot::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(anyhow!(err)).with_context(|| format!("walk {}", root.display()));
            }
            Err(err) => {
                let rel = err
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_default();
                warn!(path = %rel, err = %err, "skipping unreadable entry");
                snapshot.unreadable.push(rel);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if snapshot.files.len() >= limits.max_files {
            snapshot.truncated = true;
            break;
        }
        let rel = relative_path(root, entry.path());
        match summarize(&entry, limits) {
            Ok(Some(summary)) => snapshot.files.push(FileSummary { path: rel, ..summary }),
            Ok(None) => snapshot.oversized.push(rel),
            Err(err) => {
                warn!(path = %rel, err = %format!("{err:#}"), "skipping unreadable file");
                snapshot.unreadable.push(rel);
            }
        }
    }

    debug!(
        files = snapshot.files.len(),
        truncated = snapshot.truncated,
        oversized = snapshot.oversized.len(),
        unreadable = snapshot.unreadable.len(),
        "snapshot taken"
    );
    Ok(snapshot)
}

/// Summary with an empty `path`, or `None` when the file is over the size cap.
fn summarize(entry: &DirEntry, limits: &ReviewConfig) -> Result<Option<FileSummary>> {
    let path = entry.path();
    let bytes = entry
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if bytes > limits.max_file_bytes {
        return Ok(None);
    }
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let (excerpt, excerpt_truncated, binary) = match String::from_utf8(raw) {
        Ok(text) => {
            let (excerpt, truncated) = excerpt_of(&text, limits.excerpt_bytes);
            (excerpt, truncated, false)
        }
        Err(_) => (String::new(), false, true),
    };
    Ok(Some(FileSummary {
        path: String::new(),
        bytes,
        excerpt,
        excerpt_truncated,
        binary,
    }))
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref())
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Cut `text` to at most `limit` bytes without splitting a character.
pub fn excerpt_of(text: &str, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text.to_string(), false);
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReviewConfig {
        ReviewConfig {
            retry_budget: 2,
            max_files: 10,
            max_file_bytes: 1000,
            excerpt_bytes: 8,
        }
    }

    #[test]
    fn skips_hidden_and_vendor_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        for dir in [".git", ".codeagent", "node_modules", "src"] {
            fs::create_dir_all(root.join(dir)).expect("mkdir");
        }
        fs::write(root.join(".git/config"), "x").expect("write");
        fs::write(root.join(".codeagent/log"), "x").expect("write");
        fs::write(root.join("node_modules/lib.js"), "x").expect("write");
        fs::write(root.join(".env"), "SECRET=1").expect("write");
        fs::write(root.join("src/main.rs"), "fn main() {}\n").expect("write");
        fs::write(root.join("README.md"), "# hi\n").expect("write");

        let snapshot = take_snapshot(root, &limits()).expect("snapshot");
        let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
        assert!(!snapshot.truncated);
        assert_eq!(snapshot.files[1].excerpt, "fn main(");
        assert!(snapshot.files[1].excerpt_truncated);
    }

    #[test]
    fn caps_file_count_and_size() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("big.txt"), "x".repeat(2000)).expect("write");
        for i in 0..12 {
            fs::write(root.join(format!("f{i:02}.txt")), "y").expect("write");
        }
        let snapshot = take_snapshot(root, &limits()).expect("snapshot");
        assert_eq!(snapshot.files.len(), 10);
        assert!(snapshot.truncated);
        assert_eq!(snapshot.oversized, vec!["big.txt".to_string()]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(take_snapshot(&temp.path().join("gone"), &limits()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entries_are_listed_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("ok.txt"), "fine").expect("write");
        let locked = root.join("locked.txt");
        fs::write(&locked, "secret").expect("write");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");
        if fs::read(&locked).is_ok() {
            // Privileged user; permissions are not enforced.
            return;
        }

        let snapshot = take_snapshot(root, &limits()).expect("snapshot");
        let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["ok.txt"]);
        assert_eq!(snapshot.unreadable, vec!["locked.txt".to_string()]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).expect("chmod back");
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let (excerpt, truncated) = excerpt_of("héllo", 2);
        assert_eq!(excerpt, "h");
        assert!(truncated);
        assert_eq!(excerpt_of("abc", 5), ("abc".to_string(), false));
    }
}
