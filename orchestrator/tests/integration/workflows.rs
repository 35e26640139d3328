//! DAG workflows: ordering, skipping, deadlocks, and concurrency limits

use agent::{AgentRole, AgentTask, ErrorKind, Priority};
use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorEvent, StepStatus, Workflow,
    WorkflowStatus, WorkflowStep,
};

use crate::support::{scripted, scripted_with, start_log, started, StartLog};

fn step(id: &str, agent: &str, deps: &[&str]) -> WorkflowStep {
    let task = AgentTask::with_id(id, "execute", id).with_dependencies(deps.iter().copied());
    WorkflowStep::new(task, agent)
}

async fn orchestrator(max_concurrency: usize, agents: &[&str], log: &StartLog) -> Orchestrator {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_max_concurrency(max_concurrency));
    for id in agents {
        orchestrator.register_agent(scripted(id, AgentRole::Executor, log)).await;
    }
    orchestrator
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_diamond_respects_dependencies() {
    let log = start_log();
    let orchestrator = orchestrator(4, &["x", "y"], &log).await;
    let mut workflow = Workflow::new("diamond")
        .with_step(step("a", "x", &[]))
        .with_step(step("b", "x", &["a"]))
        .with_step(step("c", "y", &["a"]))
        .with_step(step("d", "x", &["b", "c"]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.count(StepStatus::Completed), 4);

    let at = |id: &str| workflow.step(id).unwrap();
    assert!(at("b").started_at >= at("a").completed_at);
    assert!(at("c").started_at >= at("a").completed_at);
    assert!(at("d").started_at >= at("b").completed_at);
    assert!(at("d").started_at >= at("c").completed_at);

    let order = started(&log);
    assert_eq!(order.first().map(String::as_str), Some("a"));
    assert_eq!(order.last().map(String::as_str), Some("d"));

    // dependency outputs reach the dependent and the workflow context
    let d_output = &at("d").result.as_ref().unwrap().output;
    assert_eq!(d_output["saw"]["b"]["step"], "b");
    assert_eq!(d_output["saw"]["c"]["step"], "c");
    assert_eq!(workflow.context["a"]["step"], "a");
}

#[tokio::test]
async fn test_linear_chain_with_concurrency_one() {
    let log = start_log();
    let orchestrator = orchestrator(1, &["x", "y", "z"], &log).await;
    let mut workflow = Workflow::new("chain")
        .with_step(step("c", "z", &["b"]))
        .with_step(step("b", "y", &["a"]))
        .with_step(step("a", "x", &[]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(started(&log), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_wave_order_follows_priority() {
    let log = start_log();
    let orchestrator = orchestrator(1, &["x", "y", "z"], &log).await;
    let mut workflow = Workflow::new("priorities")
        .with_step(step("low", "x", &[]))
        .with_step(step("normal", "y", &[]))
        .with_step(step("urgent", "z", &[]));
    workflow.steps[0].task.priority = Priority::Low;
    workflow.steps[2].task.priority = Priority::Critical;

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(started(&log), vec!["urgent", "normal", "low"]);
}

#[tokio::test]
async fn test_independent_steps_run_concurrently() {
    let log = start_log();
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    for id in ["x", "y", "z"] {
        orchestrator
            .register_agent(scripted_with(id, AgentRole::Executor, &log, 150, &[]))
            .await;
    }
    let mut workflow = Workflow::new("fan-out")
        .with_step(step("a", "x", &[]))
        .with_step(step("b", "y", &[]))
        .with_step(step("c", "z", &[]));

    let started_at = std::time::Instant::now();
    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert!(started_at.elapsed().as_millis() < 400);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_step_skips_dependents() {
    let log = start_log();
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    orchestrator
        .register_agent(scripted_with("x", AgentRole::Executor, &log, 0, &["a"]))
        .await;
    orchestrator.register_agent(scripted("y", AgentRole::Executor, &log)).await;
    let mut workflow = Workflow::new("skips")
        .with_step(step("a", "x", &[]))
        .with_step(step("b", "x", &["a"]))
        .with_step(step("c", "y", &["b"]))
        .with_step(step("other", "y", &[]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert!(workflow.error.is_some());
    assert_eq!(workflow.step("a").unwrap().status, StepStatus::Failed);
    assert_eq!(workflow.step("b").unwrap().status, StepStatus::Skipped);
    assert_eq!(workflow.step("c").unwrap().status, StepStatus::Skipped);
    assert_eq!(workflow.step("other").unwrap().status, StepStatus::Completed);

    // skipped steps never reach an agent
    let mut order = started(&log);
    order.sort();
    assert_eq!(order, vec!["a", "other"]);
}

#[tokio::test]
async fn test_unknown_agent_fails_step_without_dispatch() {
    let log = start_log();
    let orchestrator = orchestrator(4, &["x"], &log).await;
    let mut workflow = Workflow::new("ghost")
        .with_step(step("a", "ghost", &[]))
        .with_step(step("b", "x", &["a"]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    let a = workflow.step("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.result.as_ref().unwrap().error_kind, Some(ErrorKind::AgentNotFound));
    assert_eq!(workflow.step("b").unwrap().status, StepStatus::Skipped);
    assert!(started(&log).is_empty());
}

#[tokio::test]
async fn test_cycle_is_a_deadlock() {
    let log = start_log();
    let orchestrator = orchestrator(4, &["x"], &log).await;
    let mut workflow = Workflow::new("cycle")
        .with_step(step("root", "x", &[]))
        .with_step(step("a", "x", &["b"]))
        .with_step(step("b", "x", &["a"]));

    let err = orchestrator.execute_workflow(&mut workflow).await.unwrap_err();

    match err {
        OrchestratorError::Deadlock { mut steps } => {
            steps.sort();
            assert_eq!(steps, vec!["a", "b"]);
        }
        other => panic!("expected deadlock, got {:?}", other),
    }
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert_eq!(workflow.step("root").unwrap().status, StepStatus::Completed);
    assert_eq!(workflow.step("a").unwrap().status, StepStatus::Pending);
    assert_eq!(orchestrator.get_status().await.active_workflows, 0);
}

#[tokio::test]
async fn test_unresolved_dependency_is_rejected_up_front() {
    let log = start_log();
    let orchestrator = orchestrator(4, &["x"], &log).await;
    let mut workflow = Workflow::new("dangling").with_step(step("a", "x", &["missing"]));

    let err = orchestrator.execute_workflow(&mut workflow).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnresolvedDependency);
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert!(started(&log).is_empty());
}

#[tokio::test]
async fn test_retry_failed_step() {
    let log = start_log();
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    orchestrator
        .register_agent(scripted_with("x", AgentRole::Executor, &log, 0, &["a"]))
        .await;
    let mut workflow = Workflow::new("retry")
        .with_step(step("a", "x", &[]))
        .with_step(step("b", "x", &["a"]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Failed);

    // replace the agent with one that succeeds, then rerun
    orchestrator.register_agent(scripted("x", AgentRole::Executor, &log)).await;
    workflow.reset_step_for_retry("a").unwrap();
    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.step("a").unwrap().retries, 1);
    assert_eq!(started(&log), vec!["a", "a", "b"]);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_workflow_events() {
    let log = start_log();
    let orchestrator = orchestrator(4, &["x"], &log).await;
    let (_, mut events) = orchestrator.subscribe();
    let mut workflow = Workflow::new("events").with_step(step("a", "x", &[]));

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(OrchestratorEvent::WorkflowStarted { steps: 1, .. })));
    assert!(seen.iter().any(|e| matches!(e, OrchestratorEvent::TaskCompleted { .. })));
    assert!(matches!(seen.last(), Some(OrchestratorEvent::WorkflowCompleted { .. })));
    assert_eq!(orchestrator.get_status().await.active_workflows, 0);
}
