//! Side-effecting adapters: processes, git, providers, and the filesystem.

pub mod checkpoint;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod provider;
pub mod run_log;
pub mod shell;
pub mod snapshot;
