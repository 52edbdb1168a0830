//! Plan invariants not expressible via JSON Schema.

use std::collections::HashSet;
use std::fmt;

use crate::core::types::{Task, TaskId};

/// Largest id a plan may use. Leaves room for fix tasks numbered after it.
pub const MAX_TASK_ID: TaskId = 1_000_000;

/// A single rule violation found in a candidate task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanViolation {
    NoTasks,
    EmptyPayload { id: TaskId },
    DuplicateId { id: TaskId },
    IdOutOfRange { id: TaskId },
    /// `dep` is not an earlier task (forward reference, self reference, or unknown id).
    ForwardDependency { id: TaskId, dep: TaskId },
}

impl fmt::Display for PlanViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanViolation::NoTasks => write!(f, "plan has no tasks"),
            PlanViolation::EmptyPayload { id } => write!(f, "task {id}: empty payload"),
            PlanViolation::DuplicateId { id } => write!(f, "duplicate task id {id}"),
            PlanViolation::IdOutOfRange { id } => {
                write!(f, "task id {id} exceeds the limit of {MAX_TASK_ID}")
            }
            PlanViolation::ForwardDependency { id, dep } => {
                write!(f, "task {id}: depends on {dep}, which is not an earlier task")
            }
        }
    }
}

/// Check plan rules in order:
/// - at least one task
/// - every task has a non-empty payload
/// - no id exceeds [`MAX_TASK_ID`]
/// - ids are unique and `depends_on` only points at earlier tasks
///
/// Backward-only references make the dependency graph acyclic with list
/// order as its single topological order.
pub fn validate_tasks(tasks: &[Task]) -> Vec<PlanViolation> {
    let mut errors = Vec::new();
    if tasks.is_empty() {
        errors.push(PlanViolation::NoTasks);
        return errors;
    }

    for task in tasks {
        if task.payload.trim().is_empty() {
            errors.push(PlanViolation::EmptyPayload { id: task.id });
        }
        if task.id > MAX_TASK_ID {
            errors.push(PlanViolation::IdOutOfRange { id: task.id });
        }
    }

    let mut seen: HashSet<TaskId> = HashSet::new();
    for task in tasks {
        for dep in &task.depends_on {
            if !seen.contains(dep) {
                errors.push(PlanViolation::ForwardDependency {
                    id: task.id,
                    dep: *dep,
                });
            }
        }
        if !seen.insert(task.id) {
            errors.push(PlanViolation::DuplicateId { id: task.id });
        }
    }

    errors
}

/// True if every dependency edge points strictly backward in list order.
pub fn is_forward_only(tasks: &[Task]) -> bool {
    let mut seen: HashSet<TaskId> = HashSet::new();
    for task in tasks {
        if task.depends_on.iter().any(|dep| !seen.contains(dep)) {
            return false;
        }
        seen.insert(task.id);
    }
    true
}
