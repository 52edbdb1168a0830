//! Pure state-machine decisions for the orchestrator.

use crate::core::budget::RetryBudget;
use crate::core::types::{Issue, ReviewVerdict, RunPhase, VerdictSource};

/// What to do after a review round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// Stop; `unresolved` is empty when the review passed.
    Finish { unresolved: Vec<Issue> },
    /// Spend one budget unit and run a fix cycle.
    Fix,
}

impl ReviewDecision {
    pub fn next_phase(&self) -> RunPhase {
        match self {
            ReviewDecision::Finish { .. } => RunPhase::Done,
            ReviewDecision::Fix => RunPhase::Fixing,
        }
    }
}

/// Decide the transition out of `Reviewing`.
///
/// A passed or unavailable review ends the run without touching the budget
/// and with nothing unresolved; a failed
/// review spends budget while any remains and otherwise ends with its issues
/// surfaced.
pub fn after_review(
    verdict: &ReviewVerdict,
    source: VerdictSource,
    budget: &RetryBudget,
) -> ReviewDecision {
    if verdict.passed || source == VerdictSource::Unavailable {
        // Issues listed alongside a pass are advisory and stay in the verdict.
        return ReviewDecision::Finish {
            unresolved: Vec::new(),
        };
    }
    if budget.is_exhausted() {
        return ReviewDecision::Finish {
            unresolved: verdict.issues.clone(),
        };
    }
    ReviewDecision::Fix
}

/// Allowed phase edges; used to check recorded traces.
pub fn is_valid_transition(from: RunPhase, to: RunPhase) -> bool {
    matches!(
        (from, to),
        (RunPhase::Planning, RunPhase::Executing)
            | (RunPhase::Executing, RunPhase::Checkpointed)
            | (RunPhase::Checkpointed, RunPhase::Reviewing)
            | (RunPhase::Reviewing, RunPhase::Done)
            | (RunPhase::Reviewing, RunPhase::Fixing)
            | (RunPhase::Fixing, RunPhase::Executing)
    ) || (to == RunPhase::Aborted && !from.is_terminal())
}
