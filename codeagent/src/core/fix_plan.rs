//! Conversion of review issues into a fix sub-plan.

use crate::core::types::{Issue, Plan, PlanSource, Task, TaskId};

/// Build a fix plan from the issues that carry a suggested fix.
///
/// Fix tasks are renumbered from `next_id` upward in issue order and carry no
/// dependencies; provisional ids and dependency lists from the review are
/// discarded. Issues without a fix contribute nothing, and fixes that would
/// need an id past `TaskId::MAX` are dropped.
pub fn build_fix_plan(issues: &[Issue], next_id: TaskId) -> Plan {
    let tasks = issues
        .iter()
        .filter_map(|issue| issue.suggested_fix.as_ref())
        .zip(next_id..=TaskId::MAX)
        .map(|(fix, id)| Task {
            id,
            kind: fix.kind,
            payload: fix.payload.clone(),
            depends_on: Vec::new(),
        })
        .collect();
    Plan {
        source: PlanSource::Fix,
        tasks,
    }
}
