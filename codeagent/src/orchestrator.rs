//! Plan → execute → checkpoint → review → fix state machine.
//!
//! The orchestrator owns all run state; planner, executor, checkpointer and
//! reviewer are stateless services it calls in turn. A fix run skips
//! planning and starts at the review. Per-task and per-call
//! failures are contained where they happen. Only an [`InfrastructureError`]
//! ends a run early, and even then the caller receives a report rather than
//! an error.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::budget::RetryBudget;
use crate::core::plan_parser::PlanParse;
use crate::core::transitions::{ReviewDecision, after_review, is_valid_transition};
use crate::core::types::{
    Checkpoint, ExecStatus, ExecutionResult, Issue, Plan, ReviewVerdict, RunOutcome, RunPhase,
    TaskId, VerdictSource,
};
use crate::executor::TaskExecutor;
use crate::io::checkpoint::Checkpointer;
use crate::io::config::AgentConfig;
use crate::io::provider::Provider;
use crate::io::run_log::RunLog;
use crate::io::shell::Shell;
use crate::io::snapshot::take_snapshot;
use crate::planner;
use crate::review::{ProjectState, ReviewEngine};

/// Unusable working tree or version-control tool. The only abort cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfrastructureError {
    pub reason: String,
}

impl InfrastructureError {
    fn new(context: &str, err: &anyhow::Error) -> Self {
        Self {
            reason: format!("{context}: {err:#}"),
        }
    }
}

impl fmt::Display for InfrastructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for InfrastructureError {}

/// A verdict together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedVerdict {
    #[serde(flatten)]
    pub verdict: ReviewVerdict,
    pub source: VerdictSource,
}

/// Final report handed back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub description: String,
    pub outcome: RunOutcome,
    /// Every phase entered, in order.
    pub phases: Vec<RunPhase>,
    /// Initial plan first, then one fix plan per fix cycle.
    pub plans: Vec<Plan>,
    /// Why the fallback plan was used, when it was.
    pub fallback_reason: Option<String>,
    /// One record per attempt, in execution order.
    pub results: Vec<ExecutionResult>,
    pub checkpoints: Vec<Checkpoint>,
    pub verdicts: Vec<RecordedVerdict>,
    pub review_calls: u32,
    pub retry_budget_spent: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn last_verdict(&self) -> Option<&RecordedVerdict> {
        self.verdicts.last()
    }

    /// Final status per executed task, in execution order.
    pub fn final_statuses(&self) -> Vec<(TaskId, ExecStatus)> {
        let mut out: Vec<(TaskId, ExecStatus)> = Vec::new();
        for result in &self.results {
            match out.last_mut() {
                Some((id, status)) if *id == result.task_id && *status == ExecStatus::Failed => {
                    *status = result.status;
                }
                _ => out.push((result.task_id, result.status)),
            }
        }
        out
    }

    pub fn skipped_tasks(&self) -> Vec<TaskId> {
        self.final_statuses()
            .into_iter()
            .filter(|(_, status)| *status == ExecStatus::Skipped)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn unresolved(&self) -> &[Issue] {
        match &self.outcome {
            RunOutcome::Done { unresolved } => unresolved,
            RunOutcome::Aborted { .. } => &[],
        }
    }

    /// Done, last review passed, and nothing skipped.
    pub fn is_clean(&self) -> bool {
        self.outcome.is_done()
            && self.last_verdict().is_some_and(|v| v.verdict.passed)
            && self.skipped_tasks().is_empty()
    }
}

/// Mutable state for one invocation.
struct RunState {
    report: RunReport,
    budget: RetryBudget,
    log: Option<RunLog>,
    next_task_id: TaskId,
    previous_issues: Vec<String>,
}

impl RunState {
    fn new(description: &str, budget: u32) -> Self {
        let now = Utc::now();
        Self {
            report: RunReport {
                run_id: None,
                description: description.to_string(),
                outcome: RunOutcome::Done {
                    unresolved: Vec::new(),
                },
                phases: Vec::new(),
                plans: Vec::new(),
                fallback_reason: None,
                results: Vec::new(),
                checkpoints: Vec::new(),
                verdicts: Vec::new(),
                review_calls: 0,
                retry_budget_spent: 0,
                started_at: now,
                finished_at: now,
            },
            budget: RetryBudget::new(budget),
            log: None,
            next_task_id: 1,
            previous_issues: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        if let Some(&from) = self.report.phases.last()
            && !is_valid_transition(from, phase)
        {
            warn!(?from, to = ?phase, "unexpected phase transition");
        }
        info!(?phase, "entering phase");
        self.report.phases.push(phase);
    }

    fn record_plan(&mut self, plan: &Plan) {
        if let Some(max) = plan.max_id() {
            self.next_task_id = self.next_task_id.max(max.saturating_add(1));
        }
        self.report.plans.push(plan.clone());
    }

    fn finish(mut self, outcome: RunOutcome) -> RunReport {
        let terminal = match outcome {
            RunOutcome::Done { .. } => RunPhase::Done,
            RunOutcome::Aborted { .. } => RunPhase::Aborted,
        };
        self.enter(terminal);
        self.report.outcome = outcome;
        self.report.retry_budget_spent = self.budget.spent();
        self.report.finished_at = Utc::now();
        if let Some(log) = &self.log
            && let Err(err) = log.write_report(&self.report)
        {
            warn!(err = %format!("{err:#}"), "failed to write run report");
        }
        self.report
    }
}

/// Top-level engine. Holds configuration and the two external boundaries.
pub struct Orchestrator<P, S> {
    config: AgentConfig,
    provider: P,
    shell: S,
}

impl<P: Provider, S: Shell> Orchestrator<P, S> {
    pub fn new(config: AgentConfig, provider: P, shell: S) -> Self {
        Self {
            config,
            provider,
            shell,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Run the full cycle for `description` in `workdir`. Always returns a
    /// report; infrastructure failures surface as `RunOutcome::Aborted`.
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    pub fn run(&self, description: &str, workdir: &Path) -> RunReport {
        let mut state = RunState::new(description, self.config.review.retry_budget);
        state.enter(RunPhase::Planning);
        let outcome = match self.drive(&mut state, workdir) {
            Ok(unresolved) => RunOutcome::Done { unresolved },
            Err(err) => {
                warn!(reason = %err, "run aborted");
                RunOutcome::Aborted { reason: err.reason }
            }
        };
        let report = state.finish(outcome);
        info!(
            done = report.outcome.is_done(),
            checkpoints = report.checkpoints.len(),
            review_calls = report.review_calls,
            "run finished"
        );
        report
    }

    /// Repair an existing project: no planning round. The first review sees
    /// `problem` as an outstanding issue and its fixes run through the same
    /// review and fix loop as [`Orchestrator::run`].
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    pub fn fix(&self, problem: &str, workdir: &Path) -> RunReport {
        let mut state = RunState::new(problem, self.config.review.retry_budget);
        state.previous_issues = vec![problem.to_string()];
        state.enter(RunPhase::Reviewing);
        let outcome = match self.drive_fix(&mut state, workdir) {
            Ok(unresolved) => RunOutcome::Done { unresolved },
            Err(err) => {
                warn!(reason = %err, "fix run aborted");
                RunOutcome::Aborted { reason: err.reason }
            }
        };
        let report = state.finish(outcome);
        info!(
            done = report.outcome.is_done(),
            checkpoints = report.checkpoints.len(),
            review_calls = report.review_calls,
            "fix run finished"
        );
        report
    }

    /// Plan only: no working-tree changes, no commits.
    pub fn plan_only(&self, description: &str) -> anyhow::Result<PlanParse> {
        let round = planner::plan(&self.provider, &self.config, description, None)?;
        Ok(round.parse)
    }

    fn drive(&self, state: &mut RunState, workdir: &Path) -> Result<Vec<Issue>, InfrastructureError> {
        fs::create_dir_all(workdir).map_err(|e| InfrastructureError {
            reason: format!("create working directory {}: {e}", workdir.display()),
        })?;
        let checkpointer = self.prepare(state, workdir)?;

        let existing = take_snapshot(workdir, &self.config.review)
            .map_err(|e| InfrastructureError::new("read working tree", &e))?;
        let existing_tree = (!existing.is_empty()).then(|| existing.tree());
        let round = planner::plan(
            &self.provider,
            &self.config,
            &state.report.description,
            existing_tree.as_deref(),
        )
        .map_err(|e| InfrastructureError::new("build planning prompt", &e))?;
        self.log_exchange(state, "plan", &round.prompt, round.completion.as_deref());
        if let PlanParse::Fallback { reason, .. } = &round.parse {
            state.report.fallback_reason = Some(reason.clone());
        }
        let plan = round.parse.into_plan();
        state.record_plan(&plan);

        let executor = TaskExecutor::new(&self.shell, workdir, &self.config.execution);
        self.execute_plan(state, &plan, &executor, &checkpointer);
        state.enter(RunPhase::Reviewing);
        self.review_loop(state, workdir, &executor, &checkpointer)
    }

    fn drive_fix(
        &self,
        state: &mut RunState,
        workdir: &Path,
    ) -> Result<Vec<Issue>, InfrastructureError> {
        if !workdir.is_dir() {
            return Err(InfrastructureError {
                reason: format!("working directory {} does not exist", workdir.display()),
            });
        }
        let checkpointer = self.prepare(state, workdir)?;
        let executor = TaskExecutor::new(&self.shell, workdir, &self.config.execution);
        self.review_loop(state, workdir, &executor, &checkpointer)
    }

    /// Open the run log and make sure `workdir` is a repository.
    fn prepare(
        &self,
        state: &mut RunState,
        workdir: &Path,
    ) -> Result<Checkpointer, InfrastructureError> {
        let log = RunLog::create(workdir, state.report.started_at)
            .map_err(|e| InfrastructureError::new("prepare run log", &e))?;
        state.report.run_id = Some(log.run_id().to_string());
        state.log = Some(log);

        let checkpointer = Checkpointer::new(
            workdir,
            &self.config.git.commit_prefix,
            &self.config.git.default_branch,
        );
        checkpointer
            .ensure_repo()
            .map_err(|e| InfrastructureError::new("version control unavailable", &e))?;
        Ok(checkpointer)
    }

    /// Review, then fix while the verdict fails and budget remains. Expects
    /// the `Reviewing` phase to have been entered.
    fn review_loop<Sh: Shell>(
        &self,
        state: &mut RunState,
        workdir: &Path,
        executor: &TaskExecutor<Sh>,
        checkpointer: &Checkpointer,
    ) -> Result<Vec<Issue>, InfrastructureError> {
        let engine = ReviewEngine::new(&self.provider, &self.config);
        loop {
            let snapshot = take_snapshot(workdir, &self.config.review)
                .map_err(|e| InfrastructureError::new("read working tree", &e))?;
            let round = engine
                .review(&ProjectState {
                    description: &state.report.description,
                    snapshot: &snapshot,
                    previous_issues: &state.previous_issues,
                })
                .map_err(|e| InfrastructureError::new("build review prompt", &e))?;
            state.report.review_calls += 1;
            let name = format!("review-{}", state.report.review_calls);
            self.log_exchange(state, &name, &round.prompt, round.completion.as_deref());
            state.report.verdicts.push(RecordedVerdict {
                verdict: round.verdict.clone(),
                source: round.source,
            });

            match after_review(&round.verdict, round.source, &state.budget) {
                ReviewDecision::Finish { unresolved } => {
                    if !unresolved.is_empty() {
                        warn!(issues = unresolved.len(), "finishing with unresolved issues");
                    }
                    return Ok(unresolved);
                }
                ReviewDecision::Fix => {
                    state.budget.try_consume();
                    state.enter(RunPhase::Fixing);
                    let fix = engine.fix_plan(&round.verdict, state.next_task_id);
                    info!(
                        fix_tasks = fix.tasks.len(),
                        budget_left = state.budget.remaining(),
                        "starting fix cycle"
                    );
                    state.previous_issues = round
                        .verdict
                        .issues
                        .iter()
                        .map(|issue| issue.description.clone())
                        .collect();
                    state.record_plan(&fix);
                    self.execute_plan(state, &fix, executor, checkpointer);
                    state.enter(RunPhase::Reviewing);
                }
            }
        }
    }

    /// Execute every task in list order with one checkpoint per task outcome.
    /// A failed commit is recorded on its checkpoint and the plan goes on.
    fn execute_plan<Sh: Shell>(
        &self,
        state: &mut RunState,
        plan: &Plan,
        executor: &TaskExecutor<Sh>,
        checkpointer: &Checkpointer,
    ) {
        state.enter(RunPhase::Executing);
        for task in &plan.tasks {
            let attempts = executor.execute_with_retry(task);
            for attempt in &attempts {
                if let Some(log) = &state.log
                    && let Err(err) = log.write_attempt(attempt)
                {
                    warn!(err = %format!("{err:#}"), "failed to write attempt log");
                }
            }
            let status = attempts.last().map(|r| r.status);
            state.report.results.extend(attempts);

            let checkpoint = match checkpointer.commit(&task.summary(), task.id) {
                Ok(checkpoint) => checkpoint,
                Err(err) => {
                    warn!(task_id = task.id, err = %format!("{err:#}"), "checkpoint commit failed");
                    checkpointer.failed(task.id, &err)
                }
            };
            info!(task_id = task.id, ?status, no_op = checkpoint.no_op, "task checkpointed");
            state.report.checkpoints.push(checkpoint);
        }
        state.enter(RunPhase::Checkpointed);
    }

    fn log_exchange(&self, state: &RunState, name: &str, prompt: &str, completion: Option<&str>) {
        if let Some(log) = &state.log
            && let Err(err) = log.write_exchange(name, prompt, completion)
        {
            warn!(err = %format!("{err:#}"), "failed to write provider exchange");
        }
    }
}
