//! Completion backends behind one `generate` signature.
//!
//! The [`Provider`] trait decouples orchestration from whichever model backend
//! is configured. Tests use scripted providers that return canned completions
//! without spawning processes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::io::config::{ProviderConfig, ProviderKind};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Completions larger than this are cut; they are parsed, never replayed.
const COMPLETION_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// One completion request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Hard bound on the call; exceeding it is a [`ProviderError::TimedOut`].
    pub timeout: Duration,
}

/// Why a backend failed to produce a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    Spawn(String),
    TimedOut { timeout: Duration },
    NonZeroExit { code: Option<i32>, stderr: String },
    EmptyCompletion,
    Io(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Spawn(msg) => write!(f, "failed to start provider: {msg}"),
            ProviderError::TimedOut { timeout } => {
                write!(f, "provider timed out after {}s", timeout.as_secs())
            }
            ProviderError::NonZeroExit { code, stderr } => {
                write!(f, "provider exited with status {code:?}")?;
                if !stderr.trim().is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
            ProviderError::EmptyCompletion => write!(f, "provider returned an empty completion"),
            ProviderError::Io(msg) => write!(f, "provider i/o error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Abstraction over completion backends.
pub trait Provider {
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError>;

    /// Short label for logs and reports.
    fn name(&self) -> &str {
        "provider"
    }
}

impl<P: Provider + ?Sized> Provider for Box<P> {
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        (**self).generate(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<P: Provider + ?Sized> Provider for &P {
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        (**self).generate(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Select the configured backend once, at construction.
pub fn build_provider(config: &ProviderConfig, workdir: Option<&Path>) -> Box<dyn Provider> {
    match config.kind {
        ProviderKind::Codex => {
            let codex = CodexProvider::new(&config.model);
            match workdir {
                Some(dir) => Box::new(codex.with_workdir(dir)),
                None => Box::new(codex),
            }
        }
        ProviderKind::Command => {
            Box::new(CommandProvider::new(config.command.clone(), &config.model))
        }
    }
}

/// Provider that spawns `codex exec` in a read-only sandbox.
///
/// The prompt goes in on stdin; the final message is read back from the
/// `--output-last-message` file. Codex has no sampling flags, so temperature
/// and token limits are not forwarded.
#[derive(Debug, Clone)]
pub struct CodexProvider {
    model: String,
    workdir: Option<PathBuf>,
}

impl CodexProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

impl Provider for CodexProvider {
    #[instrument(skip_all, fields(model = %self.model, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        let output_file =
            tempfile::NamedTempFile::new().map_err(|e| ProviderError::Io(e.to_string()))?;
        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("-m")
            .arg(&self.model)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check")
            .arg("--output-last-message")
            .arg(output_file.path())
            .arg("-");
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }

        info!("requesting completion from codex");
        let output = spawn(cmd, request)?;
        check_exit(&output, request.timeout)?;

        let completion =
            fs::read_to_string(output_file.path()).map_err(|e| ProviderError::Io(e.to_string()))?;
        non_empty(completion)
    }

    fn name(&self) -> &str {
        "codex"
    }
}

/// Provider that runs a configured argv and reads the completion from stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    argv: Vec<String>,
    model: String,
}

impl CommandProvider {
    pub fn new(argv: Vec<String>, model: &str) -> Self {
        Self {
            argv,
            model: model.to_string(),
        }
    }

    fn render_argv(&self, request: &GenerateRequest) -> Vec<String> {
        let temperature = request.temperature.to_string();
        let max_tokens = request.max_tokens.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{model}", &self.model)
                    .replace("{temperature}", &temperature)
                    .replace("{max_tokens}", &max_tokens)
            })
            .collect()
    }
}

impl Provider for CommandProvider {
    #[instrument(skip_all, fields(model = %self.model, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        let argv = self.render_argv(request);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProviderError::Spawn("empty provider command".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        debug!(program = %program, "requesting completion from command");
        let output = spawn(cmd, request)?;
        check_exit(&output, request.timeout)?;
        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        "command"
    }
}

fn spawn(cmd: Command, request: &GenerateRequest) -> Result<CommandOutput, ProviderError> {
    run_command_with_timeout(
        cmd,
        Some(request.prompt.as_bytes()),
        request.timeout,
        COMPLETION_LIMIT_BYTES,
    )
    .map_err(|e| ProviderError::Spawn(format!("{e:#}")))
}

fn check_exit(output: &CommandOutput, timeout: Duration) -> Result<(), ProviderError> {
    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "provider timed out");
        return Err(ProviderError::TimedOut { timeout });
    }
    if !output.status.success() {
        warn!(exit_code = ?output.status.code(), "provider failed");
        return Err(ProviderError::NonZeroExit {
            code: output.status.code(),
            stderr: output.stderr_lossy(),
        });
    }
    Ok(())
}

fn non_empty(completion: String) -> Result<String, ProviderError> {
    if completion.trim().is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }
    Ok(completion)
}
