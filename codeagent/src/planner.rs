//! Planning: one provider round-trip turned into a validated plan.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::plan_parser::{PlanParse, fallback_plan, parse_plan_or_fallback};
use crate::io::config::AgentConfig;
use crate::io::prompt::{PlanPromptInput, PromptBuilder};
use crate::io::provider::{GenerateRequest, Provider};

/// Everything produced by one planning call.
#[derive(Debug, Clone)]
pub struct PlanRound {
    pub parse: PlanParse,
    pub prompt: String,
    /// Raw completion; `None` when the provider failed.
    pub completion: Option<String>,
}

/// Ask the provider for a plan. Provider failures and unusable completions
/// both yield the fallback plan; only prompt rendering can error.
#[instrument(skip_all, fields(provider = provider.name()))]
pub fn plan<P: Provider>(
    provider: &P,
    config: &AgentConfig,
    description: &str,
    existing_files: Option<&str>,
) -> Result<PlanRound> {
    let prompt = PromptBuilder::default().build_plan(&PlanPromptInput {
        description,
        existing: existing_files,
    })?;
    let request = GenerateRequest {
        prompt: prompt.clone(),
        temperature: config.sampling.planning_temperature,
        max_tokens: config.sampling.max_tokens,
        timeout: config.provider.timeout(),
    };

    let (parse, completion) = match provider.generate(&request) {
        Ok(completion) => (parse_plan_or_fallback(&completion), Some(completion)),
        Err(err) => {
            warn!(err = %err, "planning call failed; using fallback plan");
            let parse = PlanParse::Fallback {
                plan: fallback_plan(),
                reason: err.to_string(),
            };
            (parse, None)
        }
    };

    match &parse {
        PlanParse::Parsed(plan) => info!(tasks = plan.tasks.len(), "plan parsed"),
        PlanParse::Fallback { reason, .. } => warn!(%reason, "using fallback plan"),
    }
    Ok(PlanRound {
        parse,
        prompt,
        completion,
    })
}
