//! Stable exit codes for the `codeagent` CLI.

/// Run finished, last review passed, no task skipped. Also used by `plan`
/// and `init-config` on success.
pub const OK: i32 = 0;
/// Run aborted on an infrastructure failure, or the command itself failed
/// (bad config, unreadable description).
pub const FAILED: i32 = 1;
/// Run finished but left unresolved issues, skipped tasks, or an
/// unavailable review.
pub const INCOMPLETE: i32 = 2;
