//! Conversion of raw planning completions into validated plans.
//!
//! Parsing is deliberately conservative: the first schema-conforming JSON
//! candidate decides the outcome, and a rule violation anywhere in it rejects
//! the whole plan rather than accepting a partial one. Callers that need
//! forward progress use [`parse_plan_or_fallback`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::extract::json_candidates;
use crate::core::invariants::{PlanViolation, validate_tasks};
use crate::core::types::{Plan, PlanSource, Task, TaskId, TaskKind};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Maximum balanced spans considered per completion.
const MAX_SPANS: usize = 8;

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+|\d+[.)]\s+)?\**([A-Za-z][A-Za-z _-]{0,30}?)\**\s*:\s*(.*)$")
        .expect("field regex is valid")
});

static PLAN_VALIDATOR: LazyLock<Result<jsonschema::Validator, String>> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).map_err(|e| format!("plan schema unreadable: {e}"))?;
    jsonschema::validator_for(&schema).map_err(|e| format!("plan schema invalid: {e}"))
});

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digits regex is valid"));

/// Why a completion could not be turned into a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanParseError {
    /// Completion was empty or whitespace.
    Empty,
    /// No JSON candidate or key/value block resembled a task list.
    NoStructuredTasks,
    /// JSON was found but none of it matched the plan schema.
    SchemaMismatch(Vec<String>),
    /// A task list was found but broke plan rules.
    Invalid(Vec<PlanViolation>),
}

impl fmt::Display for PlanParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanParseError::Empty => write!(f, "empty completion"),
            PlanParseError::NoStructuredTasks => write!(f, "no structured task list found"),
            PlanParseError::SchemaMismatch(messages) => {
                write!(f, "plan schema mismatch: {}", messages.join("; "))
            }
            PlanParseError::Invalid(violations) => {
                let parts: Vec<String> = violations.iter().map(ToString::to_string).collect();
                write!(f, "invalid plan: {}", parts.join("; "))
            }
        }
    }
}

impl std::error::Error for PlanParseError {}

/// Result of planning: either a parsed plan or the fixed fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanParse {
    Parsed(Plan),
    Fallback { plan: Plan, reason: String },
}

impl PlanParse {
    pub fn plan(&self) -> &Plan {
        match self {
            PlanParse::Parsed(plan) => plan,
            PlanParse::Fallback { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> Plan {
        match self {
            PlanParse::Parsed(plan) => plan,
            PlanParse::Fallback { plan, .. } => plan,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PlanParse::Fallback { .. })
    }
}

/// Parse a completion strictly.
pub fn parse_plan(raw: &str) -> Result<Plan, PlanParseError> {
    if raw.trim().is_empty() {
        return Err(PlanParseError::Empty);
    }

    let mut schema_errors = Vec::new();
    for candidate in json_candidates(raw, MAX_SPANS) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let messages = schema_violations(&value);
        if !messages.is_empty() {
            schema_errors.extend(messages);
            continue;
        }
        debug!(candidate_len = candidate.len(), "plan candidate matched schema");
        let tasks = tasks_from_json(&value);
        return finish(tasks);
    }

    let scanned = scan_key_value_tasks(raw);
    if !scanned.is_empty() {
        debug!(task_count = scanned.len(), "plan recovered from key/value scan");
        return finish(scanned);
    }

    if schema_errors.is_empty() {
        Err(PlanParseError::NoStructuredTasks)
    } else {
        schema_errors.dedup();
        Err(PlanParseError::SchemaMismatch(schema_errors))
    }
}

/// Parse a completion, substituting the fallback plan on any failure.
pub fn parse_plan_or_fallback(raw: &str) -> PlanParse {
    match parse_plan(raw) {
        Ok(plan) => PlanParse::Parsed(plan),
        Err(err) => PlanParse::Fallback {
            plan: fallback_plan(),
            reason: err.to_string(),
        },
    }
}

/// Fixed minimal plan used whenever planning output is unusable.
///
/// Uses only file writes and a directive so it succeeds without any tooling
/// beyond the filesystem.
pub fn fallback_plan() -> Plan {
    Plan {
        source: PlanSource::Fallback,
        tasks: vec![
            Task {
                id: 1,
                kind: TaskKind::FileWrite,
                payload: ".gitignore\n.env\nnode_modules/\ntarget/\n__pycache__/\ndist/\n"
                    .to_string(),
                depends_on: Vec::new(),
            },
            Task {
                id: 2,
                kind: TaskKind::FileWrite,
                payload: "README.md\n# Project\n\nThis repository was initialized automatically. \
                          The planning step produced no usable task list, so only the \
                          scaffold exists.\n"
                    .to_string(),
                depends_on: vec![1],
            },
            Task {
                id: 3,
                kind: TaskKind::Directive,
                payload: "Review the project description and plan the implementation manually."
                    .to_string(),
                depends_on: vec![2],
            },
        ],
    }
}

/// Build a task from one JSON object, tolerating common key variations.
///
/// Returns `None` for non-objects. A missing id uses `default_id`.
pub(crate) fn task_from_value(value: &Value, default_id: TaskId) -> Option<Task> {
    let obj = value.as_object()?;
    let id = obj.get("id").and_then(id_from_value).unwrap_or(default_id);
    let path = string_field(obj, &["path", "file", "file_path"]);
    let content = string_field(obj, &["content", "contents"]);
    let command = string_field(obj, &["command", "cmd"]);
    let payload_field = string_field(obj, &["payload"]);
    let description = string_field(obj, &["description", "name", "task_name"]);

    let kind = match string_field(obj, &["kind", "type"]) {
        Some(label) => TaskKind::from_label(&label),
        None if path.is_some() => TaskKind::FileWrite,
        None if command.is_some() => TaskKind::Command,
        None => TaskKind::Directive,
    };

    let payload = match kind {
        TaskKind::FileWrite => match (path, content) {
            (Some(path), Some(content)) => format!("{}\n{}", path.trim(), content),
            (Some(path), None) => match payload_field {
                Some(payload) if payload.lines().next().map(str::trim) == Some(path.trim()) => {
                    payload
                }
                Some(payload) => format!("{}\n{}", path.trim(), payload),
                None => path.trim().to_string(),
            },
            (None, _) => payload_field.unwrap_or_default(),
        },
        TaskKind::Command => command.or(payload_field).unwrap_or_default(),
        TaskKind::Directive => payload_field
            .or(description)
            .or(command)
            .unwrap_or_default(),
    };

    let depends_on = ["depends_on", "dependsOn", "dependencies", "deps"]
        .iter()
        .find_map(|key| obj.get(*key))
        .map(deps_from_value)
        .unwrap_or_default();

    Some(Task {
        id,
        kind,
        payload,
        depends_on,
    })
}

fn finish(tasks: Vec<Task>) -> Result<Plan, PlanParseError> {
    let violations = validate_tasks(&tasks);
    if !violations.is_empty() {
        return Err(PlanParseError::Invalid(violations));
    }
    Ok(Plan {
        source: PlanSource::Parsed,
        tasks,
    })
}

fn schema_violations(value: &Value) -> Vec<String> {
    match &*PLAN_VALIDATOR {
        Ok(validator) => validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect(),
        Err(message) => vec![message.clone()],
    }
}

fn tasks_from_json(value: &Value) -> Vec<Task> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("tasks") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| task_from_value(item, idx as TaskId + 1))
        .collect()
}

/// Recover tasks written as `Key: value` blocks, each starting at a `Task ID` line.
fn scan_key_value_tasks(raw: &str) -> Vec<Task> {
    let mut blocks: Vec<Map<String, Value>> = Vec::new();
    for line in raw.lines() {
        let Some(caps) = FIELD_RE.captures(line) else {
            continue;
        };
        let key = caps[1].trim().to_ascii_lowercase().replace(['-', '_'], " ");
        let value = caps[2].trim().to_string();
        let field = match key.as_str() {
            "task id" | "id" => {
                blocks.push(Map::new());
                "id"
            }
            "kind" | "type" | "category" => "kind",
            "command" => "command",
            "path" | "file" | "file path" => "path",
            "content" => "content",
            "payload" => "payload",
            "description" => "description",
            "task name" | "name" => "name",
            "dependencies" | "depends on" => "dependencies",
            _ => continue,
        };
        if let Some(block) = blocks.last_mut() {
            block.insert(field.to_string(), Value::String(value));
        }
    }

    blocks
        .into_iter()
        .enumerate()
        .filter_map(|(idx, block)| {
            let id = block.get("id").and_then(id_from_value)?;
            let mut task = task_from_value(&Value::Object(block), idx as TaskId + 1)?;
            task.id = id;
            (!task.payload.trim().is_empty()).then_some(task)
        })
        .collect()
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn id_from_value(value: &Value) -> Option<TaskId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| TaskId::try_from(n).ok()),
        Value::String(s) => DIGITS_RE
            .find(s)
            .and_then(|m| m.as_str().parse::<TaskId>().ok()),
        _ => None,
    }
}

fn deps_from_value(value: &Value) -> Vec<TaskId> {
    match value {
        Value::Array(items) => items.iter().filter_map(id_from_value).collect(),
        Value::String(s) => DIGITS_RE
            .find_iter(s)
            .filter_map(|m| m.as_str().parse::<TaskId>().ok())
            .collect(),
        Value::Number(_) => id_from_value(value).into_iter().collect(),
        _ => Vec::new(),
    }
}
