//! Deterministic, pure logic shared by the orchestration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod extract;
pub mod file_payload;
pub mod fix_plan;
pub mod invariants;
pub mod plan_parser;
pub mod transitions;
pub mod types;
pub mod verdict;
