//! Tolerant parsing of review completions.
//!
//! A completion that cannot be read as a verdict is treated as a pass so a
//! parser failure never blocks delivery of a working project.

use std::sync::LazyLock;

use serde_json::Value;
use tracing::debug;

use crate::core::extract::json_candidates;
use crate::core::plan_parser::task_from_value;
use crate::core::types::{Issue, ReviewVerdict, VerdictSource};

const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");

const MAX_SPANS: usize = 8;

static REVIEW_VALIDATOR: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(REVIEW_SCHEMA).ok()?;
    jsonschema::validator_for(&schema).ok()
});

/// Parse a review completion into a verdict and note how it was obtained.
pub fn parse_verdict(raw: &str) -> (ReviewVerdict, VerdictSource) {
    let Some(validator) = REVIEW_VALIDATOR.as_ref() else {
        return (ReviewVerdict::passed(), VerdictSource::Defaulted);
    };
    for candidate in json_candidates(raw, MAX_SPANS) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        if !validator.is_valid(&value) {
            continue;
        }
        return (verdict_from_value(&value), VerdictSource::Parsed);
    }
    debug!(raw_len = raw.len(), "review completion unusable; defaulting to pass");
    (ReviewVerdict::passed(), VerdictSource::Defaulted)
}

/// Verdict used when the review provider itself failed.
pub fn unavailable_verdict() -> (ReviewVerdict, VerdictSource) {
    (
        ReviewVerdict {
            passed: false,
            issues: Vec::new(),
        },
        VerdictSource::Unavailable,
    )
}

fn verdict_from_value(value: &Value) -> ReviewVerdict {
    let passed = value
        .get("passed")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue_from_value).collect())
        .unwrap_or_default();
    ReviewVerdict { passed, issues }
}

fn issue_from_value(value: &Value) -> Option<Issue> {
    let description = value.get("description")?.as_str()?.trim().to_string();
    if description.is_empty() {
        return None;
    }
    let suggested_fix = ["fix", "suggested_fix"]
        .iter()
        .find_map(|key| value.get(*key))
        .filter(|fix| fix.is_object())
        .and_then(|fix| task_from_value(fix, 0))
        .filter(|task| !task.payload.trim().is_empty());
    Some(Issue {
        description,
        suggested_fix,
    })
}
