//! End-to-end runs of the orchestrator against a scripted provider and shell.
//!
//! Every test works in a fresh temp directory with a real git repository, so
//! checkpoints are actual commits.

use std::fs;
use std::path::Path;

use codeagent::core::transitions::is_valid_transition;
use codeagent::core::types::{
    ExecStatus, PlanSource, RunOutcome, RunPhase, TaskKind, VerdictSource,
};
use codeagent::io::git::Git;
use codeagent::io::shell::SystemShell;
use codeagent::orchestrator::{Orchestrator, RunReport};
use codeagent::test_support::{
    ScriptedProvider, ScriptedShell, command, file_write, plan_completion, review_completion,
    task, test_config,
};

fn assert_phase_trace(report: &RunReport) {
    assert_eq!(report.phases.first(), Some(&RunPhase::Planning));
    for pair in report.phases.windows(2) {
        assert!(
            is_valid_transition(pair[0], pair[1]),
            "invalid transition {:?} -> {:?} in {:?}",
            pair[0],
            pair[1],
            report.phases
        );
    }
    let terminal = report.phases.last().expect("phases");
    assert!(terminal.is_terminal());
}

fn executed_tasks(report: &RunReport) -> usize {
    report.plans.iter().map(|plan| plan.tasks.len()).sum()
}

/// Provider down for the whole run: the fallback plan is executed and
/// checkpointed, and the unavailable review still ends the run normally.
#[test]
fn unavailable_provider_runs_fallback_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let orchestrator = Orchestrator::new(
        test_config(),
        ScriptedProvider::failing(),
        ScriptedShell::new(),
    );

    let report = orchestrator.run("build a static site", temp.path());

    assert!(matches!(report.outcome, RunOutcome::Done { .. }));
    assert!(report.unresolved().is_empty());
    assert!(report.fallback_reason.is_some());
    assert_eq!(report.plans.len(), 1);
    assert_eq!(report.plans[0].source, PlanSource::Fallback);
    assert_eq!(report.checkpoints.len(), 3);
    assert_eq!(report.review_calls, 1);
    assert_eq!(report.retry_budget_spent, 0);

    let verdict = report.last_verdict().expect("verdict");
    assert_eq!(verdict.source, VerdictSource::Unavailable);
    assert!(!verdict.verdict.passed);
    assert!(!report.is_clean());

    assert!(temp.path().join(".gitignore").is_file());
    assert!(temp.path().join("README.md").is_file());
    // Directive changes nothing, so only the two writes became commits.
    assert!(report.checkpoints[2].no_op);
    assert_eq!(Git::new(temp.path()).commit_count().expect("count"), 2);
    assert_eq!(orchestrator.provider().calls(), 2);
    assert_phase_trace(&report);
}

/// A task that keeps failing is skipped after its retries; later tasks still
/// run and every task gets a checkpoint.
#[test]
fn failing_task_is_skipped_and_run_continues() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = vec![
        command(1, "echo one"),
        task(2, TaskKind::Command, "make build", &[1]),
        task(3, TaskKind::Command, "echo three", &[2]),
    ];
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&plan)),
        Ok(review_completion(true, &[])),
    ]);
    let shell = ScriptedShell::new().fail_on("make");
    let config = test_config();
    let attempts = config.execution.task_retry_limit as usize + 1;
    let orchestrator = Orchestrator::new(config, provider, shell);

    let report = orchestrator.run("cli tool", temp.path());

    assert!(report.outcome.is_done());
    assert_eq!(
        report.final_statuses(),
        vec![
            (1, ExecStatus::Success),
            (2, ExecStatus::Skipped),
            (3, ExecStatus::Success)
        ]
    );
    assert_eq!(report.skipped_tasks(), vec![2]);
    assert_eq!(orchestrator.shell().count("make build"), attempts);
    assert_eq!(orchestrator.shell().count("echo three"), 1);
    assert_eq!(report.checkpoints.len(), 3);
    let task_two: Vec<_> = report.results.iter().filter(|r| r.task_id == 2).collect();
    assert_eq!(task_two.len(), attempts);
    assert!(
        task_two[..attempts - 1]
            .iter()
            .all(|r| r.status == ExecStatus::Failed)
    );
    assert!(!report.is_clean());
    assert_phase_trace(&report);
}

/// One failing review with a suggested fix, then a passing one.
#[test]
fn review_fix_cycle_then_pass() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = vec![
        file_write(1, "index.html", "<h1>hi</h1>"),
        task(2, TaskKind::Command, "echo built", &[1]),
    ];
    let fix = file_write(0, "style.css", "h1 { color: red; }");
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&plan)),
        Ok(review_completion(false, &[("missing stylesheet", Some(&fix))])),
        Ok(review_completion(true, &[])),
    ]);
    let mut config = test_config();
    config.review.retry_budget = 2;
    let orchestrator = Orchestrator::new(config, provider, ScriptedShell::new());

    let report = orchestrator.run("static site", temp.path());

    assert!(report.is_clean(), "report: {report:#?}");
    assert_eq!(report.review_calls, 2);
    assert_eq!(report.retry_budget_spent, 1);
    assert_eq!(report.plans.len(), 2);
    let fix_plan = &report.plans[1];
    assert_eq!(fix_plan.source, PlanSource::Fix);
    assert_eq!(fix_plan.tasks.len(), 1);
    assert_eq!(fix_plan.tasks[0].id, 3);
    assert!(fix_plan.tasks[0].depends_on.is_empty());
    assert_eq!(
        fs::read_to_string(temp.path().join("style.css")).expect("css"),
        "h1 { color: red; }"
    );
    assert_eq!(report.checkpoints.len(), executed_tasks(&report));
    assert_eq!(
        report.phases,
        vec![
            RunPhase::Planning,
            RunPhase::Executing,
            RunPhase::Checkpointed,
            RunPhase::Reviewing,
            RunPhase::Fixing,
            RunPhase::Executing,
            RunPhase::Checkpointed,
            RunPhase::Reviewing,
            RunPhase::Done,
        ]
    );

    // The second review sees what the first one complained about.
    let requests = orchestrator.provider().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].prompt.contains("missing stylesheet"));
}

/// With no budget a failing review ends the run with its issues unresolved.
#[test]
fn zero_budget_finishes_with_unresolved_issues() {
    let temp = tempfile::tempdir().expect("tempdir");
    let fix = command(0, "echo fix");
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&[command(1, "echo hi")])),
        Ok(review_completion(false, &[("no tests", Some(&fix))])),
    ]);
    let mut config = test_config();
    config.review.retry_budget = 0;
    let orchestrator = Orchestrator::new(config, provider, ScriptedShell::new());

    let report = orchestrator.run("lib", temp.path());

    match &report.outcome {
        RunOutcome::Done { unresolved } => {
            assert_eq!(unresolved.len(), 1);
            assert_eq!(unresolved[0].description, "no tests");
        }
        other => panic!("expected done, got {other:?}"),
    }
    assert_eq!(report.review_calls, 1);
    assert_eq!(report.plans.len(), 1);
    assert_eq!(orchestrator.shell().count("echo fix"), 0);
    assert_phase_trace(&report);
}

/// Issues without fixes still spend a cycle; the budget bounds review calls.
#[test]
fn issues_without_fixes_exhaust_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&[command(1, "echo hi")])),
        Ok(review_completion(false, &[("vague complaint", None)])),
        Ok(review_completion(false, &[("vague complaint", None)])),
    ]);
    let mut config = test_config();
    config.review.retry_budget = 1;
    let orchestrator = Orchestrator::new(config, provider, ScriptedShell::new());

    let report = orchestrator.run("lib", temp.path());

    assert_eq!(report.review_calls, 2);
    assert_eq!(report.retry_budget_spent, 1);
    assert_eq!(report.plans.len(), 2);
    assert!(report.plans[1].is_empty());
    assert_eq!(report.unresolved().len(), 1);
    assert_eq!(report.checkpoints.len(), executed_tasks(&report));
    assert_phase_trace(&report);
}

/// Re-running the same file writes leaves nothing new to commit.
#[test]
fn repeated_file_writes_are_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = vec![file_write(1, "src/main.py", "print('hi')")];
    let script = || {
        ScriptedProvider::new(vec![
            Ok(plan_completion(&plan)),
            Ok(review_completion(true, &[])),
        ])
    };

    let first = Orchestrator::new(test_config(), script(), ScriptedShell::new())
        .run("hello", temp.path());
    assert!(first.is_clean());
    assert!(!first.checkpoints[0].no_op);

    let second_orchestrator = Orchestrator::new(test_config(), script(), ScriptedShell::new());
    let second = second_orchestrator.run("hello", temp.path());
    assert!(second.is_clean());
    assert!(second.checkpoints[0].no_op);
    assert_eq!(second.checkpoints[0].commit, first.checkpoints[0].commit);
    assert!(second.results[0].output.contains("unchanged src/main.py"));
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(Git::new(temp.path()).commit_count().expect("count"), 1);

    // Planning for a non-empty tree lists what is already there.
    let requests = second_orchestrator.provider().requests();
    assert!(requests[0].prompt.contains("src/main.py"));
}

#[test]
fn unusable_workdir_aborts_without_calling_provider() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("not-a-dir");
    fs::write(&file, "x").expect("write");
    let orchestrator = Orchestrator::new(
        test_config(),
        ScriptedProvider::failing(),
        ScriptedShell::new(),
    );

    let report = orchestrator.run("anything", &file);

    match &report.outcome {
        RunOutcome::Aborted { reason } => assert!(reason.contains("working directory")),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(report.phases, vec![RunPhase::Planning, RunPhase::Aborted]);
    assert!(report.run_id.is_none());
    assert_eq!(orchestrator.provider().calls(), 0);
    assert!(report.checkpoints.is_empty());
}

#[test]
fn run_log_records_exchanges_attempts_and_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&[command(1, "echo hi")])),
        Ok(review_completion(true, &[])),
    ]);
    let report = Orchestrator::new(test_config(), provider, ScriptedShell::new())
        .run("lib", temp.path());

    let run_id = report.run_id.as_deref().expect("run id");
    let dir = temp.path().join(".codeagent").join("runs").join(run_id);
    for name in [
        "plan.prompt.md",
        "plan.completion.md",
        "review-1.prompt.md",
        "review-1.completion.md",
        "report.json",
    ] {
        assert!(dir.join(name).is_file(), "missing {name}");
    }
    assert!(dir.join("tasks").join("1-1.log").is_file());

    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("report.json")).expect("read"))
            .expect("json");
    assert_eq!(stored["outcome"]["state"], "done");
    assert_eq!(stored["review_calls"], 1);
    assert!(git_ignores_state_dir(temp.path()));
}

/// A task that leaves an uncommittable tree behind (an embedded repository
/// with no commits) does not stop later tasks.
#[test]
fn nested_repository_does_not_abort_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = vec![
        command(1, "mkdir -p frontend && git -C frontend init -q"),
        command(2, "echo hi > a.txt"),
    ];
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&plan)),
        Ok(review_completion(true, &[])),
    ]);
    let orchestrator = Orchestrator::new(test_config(), provider, SystemShell::new(10_000));

    let report = orchestrator.run("site with a frontend", temp.path());

    assert!(report.outcome.is_done(), "report: {report:#?}");
    assert_eq!(report.checkpoints.len(), 2);
    assert!(
        report
            .checkpoints
            .iter()
            .all(|c| c.error.is_none() || c.no_op)
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("a.txt")).expect("a.txt"),
        "hi\n"
    );
    assert_eq!(report.review_calls, 1);
    assert_phase_trace(&report);
}

/// Commits that fail are recorded on their checkpoints and the run goes on
/// to review.
#[test]
fn failed_commits_are_recorded_not_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let plan = vec![
        command(1, "echo hi > a.txt && touch .git/index.lock"),
        command(2, "echo more >> a.txt"),
    ];
    let provider = ScriptedProvider::new(vec![
        Ok(plan_completion(&plan)),
        Ok(review_completion(true, &[])),
    ]);
    let orchestrator = Orchestrator::new(test_config(), provider, SystemShell::new(10_000));

    let report = orchestrator.run("notes", temp.path());

    assert!(report.is_clean(), "report: {report:#?}");
    assert_eq!(report.checkpoints.len(), 2);
    for checkpoint in &report.checkpoints {
        assert!(checkpoint.no_op);
        assert!(checkpoint.error.as_deref().is_some_and(|e| !e.is_empty()));
    }
    assert_eq!(report.review_calls, 1);
    assert_phase_trace(&report);
}

/// Fix mode skips planning: the reported problem reaches the first review,
/// whose fixes run and are checkpointed before a passing re-review.
#[test]
fn fix_mode_reviews_problem_then_applies_fixes() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("index.html"), "<h1>hi</h1>\n").expect("seed");
    let fix = file_write(0, "style.css", "h1 { color: red; }");
    let provider = ScriptedProvider::new(vec![
        Ok(review_completion(false, &[("stylesheet is missing", Some(&fix))])),
        Ok(review_completion(true, &[])),
    ]);
    let orchestrator = Orchestrator::new(test_config(), provider, ScriptedShell::new());

    let report = orchestrator.fix("the heading is not red", temp.path());

    assert!(report.is_clean(), "report: {report:#?}");
    assert_eq!(report.description, "the heading is not red");
    assert!(report.fallback_reason.is_none());
    assert_eq!(report.plans.len(), 1);
    assert_eq!(report.plans[0].source, PlanSource::Fix);
    assert_eq!(report.plans[0].tasks[0].id, 1);
    assert_eq!(report.review_calls, 2);
    assert_eq!(report.retry_budget_spent, 1);
    assert_eq!(report.checkpoints.len(), 1);
    assert!(!report.checkpoints[0].no_op);
    assert_eq!(
        fs::read_to_string(temp.path().join("style.css")).expect("css"),
        "h1 { color: red; }"
    );
    assert_eq!(
        report.phases,
        vec![
            RunPhase::Reviewing,
            RunPhase::Fixing,
            RunPhase::Executing,
            RunPhase::Checkpointed,
            RunPhase::Reviewing,
            RunPhase::Done,
        ]
    );

    let requests = orchestrator.provider().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].prompt.contains("the heading is not red"));
    assert!(requests[0].prompt.contains("index.html"));
    assert!(requests[1].prompt.contains("stylesheet is missing"));

    let run_id = report.run_id.as_deref().expect("run id");
    let dir = temp.path().join(".codeagent").join("runs").join(run_id);
    assert!(!dir.join("plan.prompt.md").exists());
    assert!(dir.join("review-1.prompt.md").is_file());
}

#[test]
fn fix_mode_requires_existing_workdir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("missing");
    let orchestrator = Orchestrator::new(
        test_config(),
        ScriptedProvider::failing(),
        ScriptedShell::new(),
    );

    let report = orchestrator.fix("broken", &missing);

    match &report.outcome {
        RunOutcome::Aborted { reason } => assert!(reason.contains("does not exist")),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(report.phases, vec![RunPhase::Reviewing, RunPhase::Aborted]);
    assert!(!missing.exists());
    assert_eq!(orchestrator.provider().calls(), 0);
}

fn git_ignores_state_dir(root: &Path) -> bool {
    Git::new(root)
        .status_porcelain()
        .expect("status")
        .iter()
        .all(|entry| !entry.path.starts_with(".codeagent"))
}
