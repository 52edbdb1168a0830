//! Decoding of `file_write` payloads.
//!
//! A payload is either `path\ncontent` for one file, or a sequence of
//! sections each opened by a `>>> path` header line. Content wrapped in a
//! single Markdown fence is unwrapped.

use std::fmt;
use std::path::{Component, Path};

use crate::core::extract::strip_outer_fence;

const SECTION_PREFIX: &str = ">>> ";

/// Top-level names that file writes may never touch.
const PROTECTED: &[&str] = &[".git", ".codeagent"];

/// One file to write, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePayloadError {
    MissingPath,
    UnsafePath(String),
}

impl fmt::Display for FilePayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilePayloadError::MissingPath => write!(f, "file_write payload has no path line"),
            FilePayloadError::UnsafePath(path) => {
                write!(f, "refusing to write outside the project: {path}")
            }
        }
    }
}

impl std::error::Error for FilePayloadError {}

/// Split a payload into the files it describes.
pub fn parse_file_payload(payload: &str) -> Result<Vec<FileWrite>, FilePayloadError> {
    let body = payload.trim_start_matches(['\n', '\r']);
    let first_line = body.lines().next().unwrap_or("");
    let files = if first_line.starts_with(SECTION_PREFIX) {
        parse_sections(body)
    } else {
        let (path, content) = body.split_once('\n').unwrap_or((body, ""));
        vec![file(path, content)]
    };

    for write in &files {
        if write.path.is_empty() {
            return Err(FilePayloadError::MissingPath);
        }
        if !is_safe_relative_path(&write.path) {
            return Err(FilePayloadError::UnsafePath(write.path.clone()));
        }
    }
    Ok(files)
}

/// True for a non-empty relative path with no parent, root, or protected components.
pub fn is_safe_relative_path(path: &str) -> bool {
    let path = Path::new(path);
    if path.as_os_str().is_empty() {
        return false;
    }
    let mut components = path.components().peekable();
    if let Some(Component::Normal(first)) = components.peek()
        && PROTECTED.iter().any(|p| first.to_str() == Some(*p))
    {
        return false;
    }
    components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn parse_sections(body: &str) -> Vec<FileWrite> {
    let mut files = Vec::new();
    let mut current: Option<(&str, Vec<&str>)> = None;
    for line in body.lines() {
        if let Some(path) = line.strip_prefix(SECTION_PREFIX) {
            if let Some((path, lines)) = current.take() {
                files.push(file(path, &join_lines(&lines)));
            }
            current = Some((path, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((path, lines)) = current {
        files.push(file(path, &join_lines(&lines)));
    }
    files
}

fn join_lines(lines: &[&str]) -> String {
    let mut joined = lines.join("\n");
    if !lines.is_empty() {
        joined.push('\n');
    }
    joined
}

fn file(path: &str, content: &str) -> FileWrite {
    let path = path
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim();
    let unwrapped = strip_outer_fence(content);
    let content = if unwrapped.len() != content.len() && !unwrapped.is_empty() {
        format!("{unwrapped}\n")
    } else {
        unwrapped.to_string()
    };
    FileWrite {
        path: path.to_string(),
        content,
    }
}
