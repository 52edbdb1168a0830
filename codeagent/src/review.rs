//! Review: a quality verdict on the current project state.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::fix_plan::build_fix_plan;
use crate::core::types::{Plan, ReviewVerdict, TaskId, VerdictSource};
use crate::core::verdict::{parse_verdict, unavailable_verdict};
use crate::io::config::AgentConfig;
use crate::io::prompt::{PromptBuilder, ReviewPromptInput};
use crate::io::provider::{GenerateRequest, Provider};
use crate::io::snapshot::ProjectSnapshot;

/// What the reviewer is shown.
#[derive(Debug, Clone)]
pub struct ProjectState<'a> {
    pub description: &'a str,
    pub snapshot: &'a ProjectSnapshot,
    /// Issue descriptions from the previous round, if any.
    pub previous_issues: &'a [String],
}

/// Result of one review call.
#[derive(Debug, Clone)]
pub struct ReviewRound {
    pub verdict: ReviewVerdict,
    pub source: VerdictSource,
    pub prompt: String,
    pub completion: Option<String>,
}

/// Stateless review service bound to a provider and config.
pub struct ReviewEngine<'a, P> {
    provider: &'a P,
    config: &'a AgentConfig,
}

impl<'a, P: Provider> ReviewEngine<'a, P> {
    pub fn new(provider: &'a P, config: &'a AgentConfig) -> Self {
        Self { provider, config }
    }

    /// Ask for a verdict. A malformed completion passes by default; a failed
    /// provider call yields `passed: false` with no issues.
    #[instrument(skip_all, fields(files = state.snapshot.files.len()))]
    pub fn review(&self, state: &ProjectState<'_>) -> Result<ReviewRound> {
        let prompt = PromptBuilder::default().build_review(&ReviewPromptInput {
            description: state.description,
            snapshot: state.snapshot,
            previous_issues: state.previous_issues,
        })?;
        let request = GenerateRequest {
            prompt: prompt.clone(),
            temperature: self.config.sampling.review_temperature,
            max_tokens: self.config.sampling.max_tokens,
            timeout: self.config.provider.timeout(),
        };

        let (verdict, source, completion) = match self.provider.generate(&request) {
            Ok(completion) => {
                let (verdict, source) = parse_verdict(&completion);
                (verdict, source, Some(completion))
            }
            Err(err) => {
                warn!(err = %err, "review call failed");
                let (verdict, source) = unavailable_verdict();
                (verdict, source, None)
            }
        };
        info!(
            passed = verdict.passed,
            issues = verdict.issues.len(),
            ?source,
            "review finished"
        );
        Ok(ReviewRound {
            verdict,
            source,
            prompt,
            completion,
        })
    }

    /// Turn a verdict's suggested fixes into a fix plan numbered from `next_id`.
    pub fn fix_plan(&self, verdict: &ReviewVerdict, next_id: TaskId) -> Plan {
        build_fix_plan(&verdict.issues, next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    fn state(snapshot: &ProjectSnapshot) -> ProjectState<'_> {
        ProjectState {
            description: "site",
            snapshot,
            previous_issues: &[],
        }
    }

    #[test]
    fn parses_failing_review_into_fix_plan() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"passed": false, "issues": [
            {"description": "no css", "fix": {"kind": "file_write", "path": "a.css", "content": "x"}}
        ]}"#
        .to_string())]);
        let config = AgentConfig::default();
        let engine = ReviewEngine::new(&provider, &config);
        let snapshot = ProjectSnapshot::default();
        let round = engine.review(&state(&snapshot)).expect("review");
        assert_eq!(round.source, VerdictSource::Parsed);
        assert!(!round.verdict.passed);

        let fix = engine.fix_plan(&round.verdict, 4);
        assert_eq!(fix.tasks.len(), 1);
        assert_eq!(fix.tasks[0].id, 4);
        assert_eq!(provider.requests()[0].temperature, 0.2);
    }

    #[test]
    fn provider_failure_is_unavailable() {
        let provider = ScriptedProvider::failing();
        let config = AgentConfig::default();
        let snapshot = ProjectSnapshot::default();
        let round = ReviewEngine::new(&provider, &config)
            .review(&state(&snapshot))
            .expect("review");
        assert_eq!(round.source, VerdictSource::Unavailable);
        assert!(!round.verdict.passed);
        assert!(round.verdict.issues.is_empty());
    }

    #[test]
    fn garbage_completion_passes_by_default() {
        let provider = ScriptedProvider::new(vec![Ok("LGTM!".to_string())]);
        let config = AgentConfig::default();
        let snapshot = ProjectSnapshot::default();
        let round = ReviewEngine::new(&provider, &config)
            .review(&state(&snapshot))
            .expect("review");
        assert_eq!(round.source, VerdictSource::Defaulted);
        assert!(round.verdict.passed);
    }
}
