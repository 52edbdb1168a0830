//! Prompt rendering for the planning and review calls.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::io::snapshot::ProjectSnapshot;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Default byte budget for a rendered prompt.
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 120_000;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section regex is valid")
});

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        Self { env }
    }

    fn render_plan(&self, input: &PlanPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let rendered = template.render(context! {
            description => input.description.trim(),
            existing => input.existing.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    fn render_review(&self, input: &ReviewPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("review")?;
        let rendered = template.render(context! {
            description => input.description.trim(),
            previous_issues => input.previous_issues,
            tree => input.snapshot.tree(),
            truncated => input.snapshot.truncated,
            oversized => &input.snapshot.oversized,
            unreadable => &input.snapshot.unreadable,
            files => &input.snapshot.files,
        })?;
        Ok(rendered)
    }
}

/// Inputs for the planning prompt.
#[derive(Debug, Clone)]
pub struct PlanPromptInput<'a> {
    pub description: &'a str,
    /// File listing of a non-empty working directory.
    pub existing: Option<&'a str>,
}

/// Inputs for the review prompt.
#[derive(Debug, Clone)]
pub struct ReviewPromptInput<'a> {
    pub description: &'a str,
    pub snapshot: &'a ProjectSnapshot,
    /// Descriptions of issues reported by the previous round.
    pub previous_issues: &'a [String],
}

/// Renders prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BUDGET_BYTES)
    }
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_plan(&self, input: &PlanPromptInput<'_>) -> Result<String> {
        let rendered = PromptEngine::new()
            .render_plan(input)
            .context("render plan prompt")?;
        Ok(self.fit(&rendered, &["existing"]))
    }

    pub fn build_review(&self, input: &ReviewPromptInput<'_>) -> Result<String> {
        let rendered = PromptEngine::new()
            .render_review(input)
            .context("render review prompt")?;
        Ok(self.fit(&rendered, &["history"]))
    }

    fn fit(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes, drop_order);
        render_sections(&sections)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Section content without its marker.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections: drop droppable sections in `drop_order`,
/// then truncate the last section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    if total <= budget {
        return;
    }
    let other_len: usize = rest.iter().map(|s| s.content.len()).sum();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    const MARKER: &str = "\n[truncated]";
    let keep = if allowed > MARKER.len() {
        allowed - MARKER.len()
    } else {
        allowed
    };
    let mut cut = keep.min(last.content.len());
    while cut > 0 && !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    if allowed > MARKER.len() {
        last.content.push_str(MARKER);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::snapshot::FileSummary;

    fn snapshot() -> ProjectSnapshot {
        ProjectSnapshot {
            files: vec![FileSummary {
                path: "index.html".to_string(),
                bytes: 12,
                excerpt: "<h1>hi</h1>\n".to_string(),
                excerpt_truncated: false,
                binary: false,
            }],
            truncated: false,
            oversized: vec![],
            unreadable: vec![],
        }
    }

    #[test]
    fn plan_prompt_embeds_description_and_format() {
        let prompt = PromptBuilder::default()
            .build_plan(&PlanPromptInput {
                description: "build a static site",
                existing: None,
            })
            .expect("render");
        assert!(prompt.contains("<description>\nbuild a static site\n</description>"));
        assert!(prompt.contains("\"tasks\""));
        assert!(!prompt.contains("<existing>"));
        assert!(!prompt.contains("section:"));
    }

    #[test]
    fn review_sections_are_ordered() {
        let issues = vec!["missing stylesheet".to_string()];
        let snap = snapshot();
        let prompt = PromptBuilder::default()
            .build_review(&ReviewPromptInput {
                description: "site",
                snapshot: &snap,
                previous_issues: &issues,
            })
            .expect("render");
        let contract = prompt.find("### Review Contract").expect("contract");
        let description = prompt.find("### Project Description").expect("description");
        let history = prompt.find("- missing stylesheet").expect("history");
        let tree = prompt.find("index.html (12 bytes)").expect("tree");
        let files = prompt.find("#### index.html").expect("files");
        assert!(contract < description);
        assert!(description < history);
        assert!(history < tree);
        assert!(tree < files);
    }

    #[test]
    fn budget_drops_history_before_truncating_files() {
        let issues = vec!["x".repeat(500)];
        let mut snap = snapshot();
        snap.files[0].excerpt = "y".repeat(5000);
        let prompt = PromptBuilder::new(2500)
            .build_review(&ReviewPromptInput {
                description: "site",
                snapshot: &snap,
                previous_issues: &issues,
            })
            .expect("render");
        assert!(!prompt.contains("<history>"));
        assert!(prompt.contains("### Review Contract"));
        assert!(prompt.ends_with("[truncated]"));
        assert!(prompt.len() <= 2500 + 8);
    }
}
