//! Agent configuration stored in `codeagent.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE_NAME: &str = "codeagent.toml";

/// Agent configuration (TOML).
///
/// Read-only once loaded; the orchestrator takes it by value. Missing fields
/// default to the values below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: ProviderConfig,
    pub sampling: SamplingConfig,
    pub git: GitConfig,
    pub execution: ExecutionConfig,
    pub review: ReviewConfig,
}

/// Which completion backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `codex exec` with the prompt on stdin.
    Codex,
    /// Arbitrary argv; prompt on stdin, completion on stdout.
    Command,
}

impl ProviderKind {
    pub fn parse(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(ProviderKind::Codex),
            "command" => Ok(ProviderKind::Command),
            other => Err(anyhow!("unknown provider '{other}' (expected codex or command)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Argv for the `command` backend. `{model}`, `{temperature}` and
    /// `{max_tokens}` are substituted per call.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Codex,
            model: "gpt-4o".to_string(),
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "{model}".to_string(),
                "-o".to_string(),
                "temperature".to_string(),
                "{temperature}".to_string(),
            ],
            timeout_secs: 300,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub planning_temperature: f64,
    pub review_temperature: f64,
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            planning_temperature: 0.4,
            review_temperature: 0.2,
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub default_branch: String,
    pub commit_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            commit_prefix: "[AI-AGENT]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Retries after the first failed attempt of a task.
    pub task_retry_limit: u32,
    pub retry_delay_ms: u64,
    pub command_timeout_secs: u64,
    /// Per-stream cap on captured command output.
    pub output_limit_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            task_retry_limit: 2,
            retry_delay_ms: 500,
            command_timeout_secs: 300,
            output_limit_bytes: 100_000,
        }
    }
}

impl ExecutionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Review→fix cycles allowed per run.
    pub retry_budget: u32,
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub excerpt_bytes: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            retry_budget: 2,
            max_files: 50,
            max_file_bytes: 1_000_000,
            excerpt_bytes: 2000,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider.model.trim().is_empty() {
            return Err(anyhow!("provider.model must be non-empty"));
        }
        if self.provider.timeout_secs == 0 {
            return Err(anyhow!("provider.timeout_secs must be > 0"));
        }
        if self.provider.kind == ProviderKind::Command
            && self
                .provider
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("provider.command must be a non-empty array"));
        }
        for (name, value) in [
            ("planning_temperature", self.sampling.planning_temperature),
            ("review_temperature", self.sampling.review_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(anyhow!("sampling.{name} must be within 0.0..=2.0"));
            }
        }
        if self.sampling.max_tokens == 0 {
            return Err(anyhow!("sampling.max_tokens must be > 0"));
        }
        if self.git.default_branch.trim().is_empty() {
            return Err(anyhow!("git.default_branch must be non-empty"));
        }
        if self.execution.command_timeout_secs == 0 {
            return Err(anyhow!("execution.command_timeout_secs must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if self.review.max_files == 0 {
            return Err(anyhow!("review.max_files must be > 0"));
        }
        if self.review.excerpt_bytes == 0 {
            return Err(anyhow!("review.excerpt_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
