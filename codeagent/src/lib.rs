//! Plan–execute–review orchestration engine for model-driven code generation.
//!
//! A run turns a project description into a git-tracked working tree:
//! planning produces a dependency-ordered task list, each task is executed
//! and checkpointed as its own commit, and a review step either accepts the
//! result or yields fix tasks that feed another execution cycle.
//!
//! - **[`core`]**: Pure logic (plan and verdict parsing, invariants, phase
//!   transitions, retry budget). No I/O.
//! - **[`io`]**: Side effects (provider calls, shell, git, filesystem,
//!   config, prompts, run logs).
//!
//! [`planner`], [`executor`], [`review`] and [`orchestrator`] combine the two.

pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod review;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
