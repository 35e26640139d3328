//! Planner-driven workflows with the reference agents

use agent::{AgentRole, AgentTask};
use orchestrator::{
    AgenticLoopOptions, FileConfig, Orchestrator, OrchestratorConfig, OrchestratorError, StepStatus,
    WorkflowStatus,
};
use serde_json::json;

use crate::support::{scripted, start_log};

#[tokio::test]
async fn test_plan_and_execute_feature_objective() {
    let orchestrator = Orchestrator::with_reference_agents(&FileConfig::default()).await;

    let mut workflow = orchestrator
        .plan_workflow("Build and test a feature", Some(json!({ "team": "core" })))
        .await
        .unwrap();

    let types: Vec<_> = workflow.steps.iter().map(|s| s.task.task_type.as_str()).collect();
    assert_eq!(types, vec!["implement", "verify", "review"]);
    let agents: Vec<_> = workflow.steps.iter().map(|s| s.agent_id.as_str()).collect();
    assert_eq!(agents, vec!["executor", "executor", "reviewer"]);
    assert_eq!(workflow.steps[1].task.dependencies, vec![workflow.steps[0].id.clone()]);
    assert!(workflow.context["plan"]["steps"].is_array());
    assert_eq!(workflow.context["objective_context"]["team"], "core");

    orchestrator.execute_workflow(&mut workflow).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed, "{:?}", workflow.error);
    assert_eq!(workflow.count(StepStatus::Completed), 3);
    for step in &workflow.steps {
        assert!(step.result.as_ref().unwrap().success, "{}", step.id);
    }
}

#[tokio::test]
async fn test_objective_words_containing_keywords_stay_local() {
    let orchestrator = Orchestrator::with_reference_agents(&FileConfig::default()).await;

    for objective in ["Build and test a running tracker", "Ponder the apiary"] {
        let mut workflow = orchestrator.plan_workflow(objective, None).await.unwrap();
        orchestrator.execute_workflow(&mut workflow).await.unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Completed, "{}: {:?}", objective, workflow.error);
    }
}

#[tokio::test]
async fn test_planning_requires_a_planner() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    let log = start_log();
    orchestrator.register_agent(scripted("exec", AgentRole::Executor, &log)).await;

    let err = orchestrator.plan_workflow("anything", None).await.unwrap_err();
    assert_eq!(err, OrchestratorError::NoPlannerAvailable);
}

#[tokio::test]
async fn test_plan_falls_back_to_executor_for_missing_roles() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    let log = start_log();
    orchestrator
        .register_agent(agent::PlannerAgent::new("planner", "Planner", Default::default()))
        .await;
    orchestrator.register_agent(scripted("exec", AgentRole::Executor, &log)).await;

    let workflow = orchestrator
        .plan_workflow("Research options and build a prototype", None)
        .await
        .unwrap();

    // research and review steps have no matching agent
    assert!(workflow.steps.iter().all(|s| s.agent_id == "exec"));
    assert_eq!(workflow.steps.first().unwrap().task.task_type, "research");
}

#[tokio::test]
async fn test_review_routed_by_role() {
    let orchestrator = Orchestrator::with_reference_agents(&FileConfig::default()).await;
    let task = AgentTask::new("review", "check config").with_input(json!({
        "content": "const apiKey = \"sk-1234567890abcdef\";\nconsole.log(apiKey);\n",
    }));

    let result = orchestrator.execute_task(&task, None).await.unwrap();

    assert_eq!(result.agent_id, "reviewer");
    assert!(result.success);
    assert!(result.output["score"].as_u64().unwrap() < 100);
    assert!(!result.output["issues"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_agentic_loop_with_reference_agents() {
    let orchestrator = Orchestrator::with_reference_agents(&FileConfig::default()).await;

    let results = orchestrator
        .agentic_loop(
            AgentTask::new("execute", "Summarize the release notes").with_input(json!({ "data": "notes" })),
            AgenticLoopOptions::default().until_success(),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].agent_id, "executor");
}
