//! Plan–execute–review code generation agent.
//!
//! Turns a natural-language project description into a version-controlled
//! codebase: plan with a model, run the plan task by task with a git
//! checkpoint after each, then review and fix until the review passes or the
//! retry budget runs out.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};

use codeagent::core::plan_parser::PlanParse;
use codeagent::core::types::{ExecStatus, RunOutcome};
use codeagent::exit_codes;
use codeagent::io::config::{
    AgentConfig, CONFIG_FILE_NAME, ProviderKind, load_config, write_config,
};
use codeagent::io::provider::build_provider;
use codeagent::io::shell::SystemShell;
use codeagent::logging;
use codeagent::orchestrator::{Orchestrator, RunReport};

#[derive(Parser)]
#[command(
    name = "codeagent",
    version,
    about = "Plan, execute, checkpoint and review a generated project"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full plan → execute → review cycle.
    Run {
        #[command(flatten)]
        input: DescriptionArgs,
        /// Project directory (created if missing).
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Config file (default: <workdir>/codeagent.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `review.retry_budget`.
        #[arg(long)]
        retry_budget: Option<u32>,
        /// Override `execution.task_retry_limit`.
        #[arg(long)]
        task_retries: Option<u32>,
        /// Print the full report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Review and repair an existing project, starting from a reported problem.
    Fix {
        /// What is wrong with the project.
        problem: String,
        /// Project directory (must exist).
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Config file (default: <workdir>/codeagent.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `review.retry_budget`.
        #[arg(long)]
        retry_budget: Option<u32>,
        /// Print the full report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Produce and print a plan without executing it.
    Plan {
        #[command(flatten)]
        input: DescriptionArgs,
        /// Config file (default: ./codeagent.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a config file with default values.
    InitConfig {
        /// Destination (default: ./codeagent.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct DescriptionArgs {
    /// Project description.
    #[arg(required_unless_present = "description_file")]
    description: Option<String>,
    /// Read the description from a file instead.
    #[arg(long, conflicts_with = "description")]
    description_file: Option<PathBuf>,
}

impl DescriptionArgs {
    fn resolve(&self) -> Result<String> {
        let text = match (&self.description, &self.description_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("read description {}", path.display()))?,
            (None, None) => bail!("a project description is required"),
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("project description is empty");
        }
        Ok(text)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match cli.command {
        Command::Run {
            input,
            workdir,
            config,
            retry_budget,
            task_retries,
            json,
        } => {
            let description = input.resolve()?;
            let config_path = config.unwrap_or_else(|| workdir.join(CONFIG_FILE_NAME));
            let mut cfg = resolve_config(&config_path)?;
            if let Some(budget) = retry_budget {
                cfg.review.retry_budget = budget;
            }
            if let Some(retries) = task_retries {
                cfg.execution.task_retry_limit = retries;
            }
            cmd_run(cfg, &description, &workdir, json)
        }
        Command::Fix {
            problem,
            workdir,
            config,
            retry_budget,
            json,
        } => {
            let problem = problem.trim();
            if problem.is_empty() {
                bail!("problem description is empty");
            }
            let config_path = config.unwrap_or_else(|| workdir.join(CONFIG_FILE_NAME));
            let mut cfg = resolve_config(&config_path)?;
            if let Some(budget) = retry_budget {
                cfg.review.retry_budget = budget;
            }
            cmd_fix(cfg, problem, &workdir, json)
        }
        Command::Plan { input, config } => {
            let description = input.resolve()?;
            let config_path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            cmd_plan(resolve_config(&config_path)?, &description)
        }
        Command::InitConfig { config, force } => {
            let path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            cmd_init_config(&path, force)
        }
    }
}

fn cmd_run(cfg: AgentConfig, description: &str, workdir: &Path, json: bool) -> Result<i32> {
    let provider = build_provider(&cfg.provider, Some(workdir));
    let shell = SystemShell::new(cfg.execution.output_limit_bytes);
    let orchestrator = Orchestrator::new(cfg, provider, shell);
    let report = orchestrator.run(description, workdir);
    print_report(&report, json)
}

fn cmd_fix(cfg: AgentConfig, problem: &str, workdir: &Path, json: bool) -> Result<i32> {
    let provider = build_provider(&cfg.provider, Some(workdir));
    let shell = SystemShell::new(cfg.execution.output_limit_bytes);
    let orchestrator = Orchestrator::new(cfg, provider, shell);
    let report = orchestrator.fix(problem, workdir);
    print_report(&report, json)
}

fn print_report(report: &RunReport, json: bool) -> Result<i32> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize report")?
        );
    } else {
        print!("{}", render_summary(report));
    }
    Ok(exit_code_for(report))
}

fn cmd_plan(cfg: AgentConfig, description: &str) -> Result<i32> {
    let provider = build_provider(&cfg.provider, None);
    let shell = SystemShell::new(cfg.execution.output_limit_bytes);
    let orchestrator = Orchestrator::new(cfg, provider, shell);
    let parse = orchestrator.plan_only(description)?;
    if let PlanParse::Fallback { reason, .. } = &parse {
        eprintln!("planning failed ({reason}); showing fallback plan");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(parse.plan()).context("serialize plan")?
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Load config, then apply `CODEAGENT_PROVIDER` / `CODEAGENT_MODEL`.
fn resolve_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = load_config(path)?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

fn apply_env_overrides(
    cfg: &mut AgentConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(kind) = lookup("CODEAGENT_PROVIDER").filter(|v| !v.trim().is_empty()) {
        cfg.provider.kind = ProviderKind::parse(&kind).context("CODEAGENT_PROVIDER")?;
    }
    if let Some(model) = lookup("CODEAGENT_MODEL").filter(|v| !v.trim().is_empty()) {
        cfg.provider.model = model.trim().to_string();
    }
    Ok(())
}

fn exit_code_for(report: &RunReport) -> i32 {
    match &report.outcome {
        RunOutcome::Aborted { .. } => exit_codes::FAILED,
        RunOutcome::Done { .. } if report.is_clean() => exit_codes::OK,
        RunOutcome::Done { .. } => exit_codes::INCOMPLETE,
    }
}

fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let run_id = report.run_id.as_deref().unwrap_or("(no run id)");
    let _ = writeln!(out, "run {run_id}");
    if let Some(reason) = &report.fallback_reason {
        let _ = writeln!(out, "plan: fallback ({reason})");
    }
    let statuses = report.final_statuses();
    let count = |wanted: ExecStatus| statuses.iter().filter(|(_, s)| *s == wanted).count();
    let _ = writeln!(
        out,
        "tasks: {} succeeded, {} skipped",
        count(ExecStatus::Success),
        count(ExecStatus::Skipped)
    );
    let committed = report.checkpoints.iter().filter(|c| !c.no_op).count();
    let _ = writeln!(
        out,
        "checkpoints: {} ({} commits)",
        report.checkpoints.len(),
        committed
    );
    let _ = writeln!(
        out,
        "reviews: {} (fix cycles: {})",
        report.review_calls, report.retry_budget_spent
    );
    match &report.outcome {
        RunOutcome::Done { unresolved } if unresolved.is_empty() => {
            let passed = report.last_verdict().is_some_and(|v| v.verdict.passed);
            let _ = writeln!(
                out,
                "outcome: done{}",
                if passed { "" } else { " (review unavailable)" }
            );
        }
        RunOutcome::Done { unresolved } => {
            let _ = writeln!(
                out,
                "outcome: done with {} unresolved issue(s)",
                unresolved.len()
            );
            for issue in unresolved {
                let _ = writeln!(out, "  - {}", issue.description);
            }
        }
        RunOutcome::Aborted { reason } => {
            let _ = writeln!(out, "outcome: aborted ({reason})");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "codeagent",
            "-vv",
            "run",
            "build a static site",
            "--workdir",
            "out",
            "--retry-budget",
            "0",
            "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run {
                input,
                workdir,
                retry_budget,
                task_retries,
                json,
                ..
            } => {
                assert_eq!(input.description.as_deref(), Some("build a static site"));
                assert_eq!(workdir, PathBuf::from("out"));
                assert_eq!(retry_budget, Some(0));
                assert_eq!(task_retries, None);
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_description() {
        assert!(Cli::try_parse_from(["codeagent", "run"]).is_err());
        let cli = Cli::parse_from(["codeagent", "run", "--description-file", "idea.txt"]);
        assert!(matches!(cli.command, Command::Run { .. }));
    }

    #[test]
    fn parse_fix_with_problem() {
        let cli = Cli::parse_from([
            "codeagent",
            "fix",
            "the build fails on a missing import",
            "--workdir",
            "site",
            "--retry-budget",
            "1",
        ]);
        match cli.command {
            Command::Fix {
                problem,
                workdir,
                retry_budget,
                json,
                config,
            } => {
                assert_eq!(problem, "the build fails on a missing import");
                assert_eq!(workdir, PathBuf::from("site"));
                assert_eq!(retry_budget, Some(1));
                assert!(!json);
                assert!(config.is_none());
            }
            _ => panic!("expected fix"),
        }
        assert!(Cli::try_parse_from(["codeagent", "fix"]).is_err());
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["codeagent", "init-config", "--force"]);
        assert!(matches!(
            cli.command,
            Command::InitConfig {
                force: true,
                config: None
            }
        ));
    }

    #[test]
    fn env_overrides_provider_and_model() {
        let mut cfg = AgentConfig::default();
        apply_env_overrides(&mut cfg, |key| match key {
            "CODEAGENT_PROVIDER" => Some("command".to_string()),
            "CODEAGENT_MODEL" => Some("local-model".to_string()),
            _ => None,
        })
        .expect("apply");
        assert_eq!(cfg.provider.kind, ProviderKind::Command);
        assert_eq!(cfg.provider.model, "local-model");

        let err = apply_env_overrides(&mut cfg, |key| {
            (key == "CODEAGENT_PROVIDER").then(|| "gemini".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("unknown provider"));
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codeagent.toml");
        cmd_init_config(&path, false).expect("first write");
        assert!(cmd_init_config(&path, false).is_err());
        cmd_init_config(&path, true).expect("forced write");
    }
}
