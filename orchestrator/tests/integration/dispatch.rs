//! Dispatch: busy/idle tracking, timeouts, and failures

use std::sync::Arc;
use std::time::Duration;

use agent::{AgentProfile, AgentRole, AgentStatus, AgentTask, CustomAgent, ErrorKind};
use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
use tokio::sync::Notify;

use crate::support::{scripted, scripted_with, start_log, Broken, Gate};

// =============================================================================
// Busy tracking
// =============================================================================

#[tokio::test]
async fn test_busy_agent_rejects_second_task() {
    let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default()));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    orchestrator
        .register_agent(CustomAgent::new(
            AgentProfile::new("gate", "gate", AgentRole::Executor),
            Gate {
                entered: entered.clone(),
                release: release.clone(),
            },
        ))
        .await;

    let running = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute_task(&AgentTask::new("execute", "hold"), Some("gate"))
                .await
        })
    };
    entered.notified().await;

    let err = orchestrator
        .execute_task(&AgentTask::new("execute", "second"), Some("gate"))
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::AgentBusy("gate".into()));
    assert_eq!(err.kind(), ErrorKind::AgentBusy);

    // rejection leaves the running task's status alone
    assert_eq!(orchestrator.get_agent("gate").await.unwrap().status, AgentStatus::Busy);
    assert_eq!(orchestrator.get_status().await.busy_agents, 1);
    assert!(orchestrator.get_available_agents().await.is_empty());

    // role inference skips the busy agent and finds nobody else
    let err = orchestrator
        .execute_task(&AgentTask::new("execute", "third"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoSuitableAgent(_)));

    release.notify_one();
    let result = running.await.unwrap().unwrap();
    assert!(result.success);
    assert_eq!(orchestrator.get_agent("gate").await.unwrap().status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_busy_sender_cannot_message() {
    let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default()));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let log = start_log();
    orchestrator
        .register_agent(CustomAgent::new(
            AgentProfile::new("gate", "gate", AgentRole::Executor),
            Gate {
                entered: entered.clone(),
                release: release.clone(),
            },
        ))
        .await;
    orchestrator.register_agent(scripted("peer", AgentRole::Executor, &log)).await;

    let running = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .execute_task(&AgentTask::new("execute", "hold"), Some("gate"))
                .await
        })
    };
    entered.notified().await;

    let sent = tokio::time::timeout(
        Duration::from_millis(500),
        orchestrator.agent_communication("gate", "peer", "hello", None),
    )
    .await
    .expect("communication should not wait on a busy sender");
    assert_eq!(sent.unwrap_err(), OrchestratorError::AgentBusy("gate".into()));

    // the peer was never dispatched and is still free
    assert!(crate::support::started(&log).is_empty());
    assert_eq!(orchestrator.get_agent("peer").await.unwrap().status, AgentStatus::Idle);

    release.notify_one();
    assert!(running.await.unwrap().unwrap().success);
    let reply = orchestrator
        .agent_communication("gate", "peer", "hello", None)
        .await
        .unwrap();
    assert!(reply.contains("step"));
}

#[tokio::test]
async fn test_agent_idle_after_every_outcome() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_default_timeout_ms(30));
    let log = start_log();
    orchestrator.register_agent(scripted("ok", AgentRole::Executor, &log)).await;
    orchestrator
        .register_agent(CustomAgent::new(
            AgentProfile::new("broken", "broken", AgentRole::Executor),
            Broken,
        ))
        .await;
    orchestrator
        .register_agent(scripted_with("slow", AgentRole::Executor, &log, 2_000, &[]))
        .await;

    let ok = orchestrator
        .execute_task(&AgentTask::new("execute", "fine"), Some("ok"))
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(ok.agent_id, "ok");

    let broken = orchestrator
        .execute_task(&AgentTask::new("execute", "boom"), Some("broken"))
        .await
        .unwrap();
    assert!(!broken.success);
    assert_eq!(broken.error_kind, Some(ErrorKind::ExecutionFailed));
    assert!(broken.error.unwrap().contains("handler exploded"));

    let slow = orchestrator
        .execute_task(&AgentTask::new("execute", "wait"), Some("slow"))
        .await
        .unwrap();
    assert_eq!(slow.error_kind, Some(ErrorKind::Timeout));

    for id in ["ok", "broken", "slow"] {
        assert_eq!(orchestrator.get_agent(id).await.unwrap().status, AgentStatus::Idle, "{}", id);
    }
    assert_eq!(orchestrator.get_available_agents().await.len(), 3);
}

#[tokio::test]
async fn test_result_identity_is_owned_by_orchestrator() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    let log = start_log();
    orchestrator.register_agent(scripted("exec", AgentRole::Executor, &log)).await;

    let task = AgentTask::with_id("fixed-id", "execute", "go");
    let result = orchestrator.execute_task(&task, None).await.unwrap();
    assert_eq!(result.task_id, "fixed-id");
    assert_eq!(result.agent_id, "exec");
    assert_eq!(crate::support::started(&log), vec!["fixed-id"]);
}

#[tokio::test]
async fn test_offline_agent_is_not_dispatched() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    let log = start_log();
    orchestrator.register_agent(scripted("exec", AgentRole::Executor, &log)).await;
    orchestrator.set_agent_status("exec", AgentStatus::Offline).await.unwrap();

    let err = orchestrator
        .execute_task(&AgentTask::new("execute", "go"), Some("exec"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentBusy);
    assert!(crate::support::started(&log).is_empty());

    orchestrator.set_agent_status("exec", AgentStatus::Idle).await.unwrap();
    assert!(orchestrator
        .execute_task(&AgentTask::new("execute", "go"), Some("exec"))
        .await
        .unwrap()
        .success);
}
