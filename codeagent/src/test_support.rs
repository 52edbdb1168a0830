//! Test-only doubles and builders for driving the engine without a model.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::core::types::{Task, TaskId, TaskKind};
use crate::io::config::AgentConfig;
use crate::io::provider::{GenerateRequest, Provider, ProviderError};
use crate::io::shell::{Shell, ShellOutput};

/// Provider that replays a fixed script of completions.
///
/// Once the script is exhausted every call fails, which makes
/// `ScriptedProvider::failing()` an always-unavailable backend.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: RefCell<VecDeque<Result<String, ProviderError>>>,
    requests: RefCell<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Provider for ScriptedProvider {
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Spawn("scripted provider exhausted".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Shell that succeeds unless a command contains a registered failure pattern.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    failures: Vec<String>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command containing `pattern`.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == command).count()
    }
}

impl Shell for ScriptedShell {
    fn run(&self, command: &str, _cwd: &Path, _timeout: Duration) -> Result<ShellOutput> {
        self.calls.borrow_mut().push(command.to_string());
        let failed = self.failures.iter().any(|p| command.contains(p.as_str()));
        Ok(ShellOutput {
            exit_code: Some(if failed { 1 } else { 0 }),
            stdout: format!("ran {command}\n"),
            stderr: if failed {
                "scripted failure\n".to_string()
            } else {
                String::new()
            },
            timed_out: false,
        })
    }
}

/// Default config with no retry delay and short timeouts.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.execution.retry_delay_ms = 0;
    config.execution.command_timeout_secs = 10;
    config.provider.timeout_secs = 10;
    config
}

pub fn task(id: TaskId, kind: TaskKind, payload: &str, depends_on: &[TaskId]) -> Task {
    Task {
        id,
        kind,
        payload: payload.to_string(),
        depends_on: depends_on.to_vec(),
    }
}

pub fn command(id: TaskId, payload: &str) -> Task {
    task(id, TaskKind::Command, payload, &[])
}

pub fn file_write(id: TaskId, path: &str, content: &str) -> Task {
    task(id, TaskKind::FileWrite, &format!("{path}\n{content}"), &[])
}

/// Render tasks as a fenced planning completion with surrounding prose.
pub fn plan_completion(tasks: &[Task]) -> String {
    let items: Vec<_> = tasks
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "kind": t.kind.as_str(),
                "payload": t.payload,
                "depends_on": t.depends_on,
            })
        })
        .collect();
    format!(
        "Here is the plan.\n\n```json\n{}\n```\n",
        json!({ "tasks": items })
    )
}

/// Render a review completion. Each issue is `(description, optional fix)`.
pub fn review_completion(passed: bool, issues: &[(&str, Option<&Task>)]) -> String {
    let items: Vec<_> = issues
        .iter()
        .map(|(description, fix)| match fix {
            Some(t) => json!({
                "description": description,
                "fix": {"kind": t.kind.as_str(), "payload": t.payload},
            }),
            None => json!({ "description": description }),
        })
        .collect();
    format!(
        "```json\n{}\n```\n",
        json!({ "passed": passed, "issues": items })
    )
}
