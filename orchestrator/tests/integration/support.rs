//! Scripted agents for the integration suites
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent::{AgentContext, AgentProfile, AgentResult, AgentRole, AgentTask, CustomAgent, ErrorKind, TaskHandler};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

/// Task ids in the order agents started them
pub type StartLog = Arc<Mutex<Vec<String>>>;

pub fn start_log() -> StartLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn started(log: &StartLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Records the start, sleeps, then succeeds unless the task id is listed
/// in `fail`
pub struct Scripted {
    pub log: StartLog,
    pub delay_ms: u64,
    pub fail: Vec<String>,
}

#[async_trait]
impl TaskHandler for Scripted {
    async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
        self.log.lock().unwrap().push(task.id.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail.contains(&task.id) {
            return Ok(AgentResult::failure(&task.id, "", ErrorKind::ExecutionFailed, "scripted failure"));
        }
        Ok(AgentResult::success(
            &task.id,
            "",
            json!({
                "step": task.id,
                "saw": task.metadata.get("dependency_results").cloned(),
            }),
        ))
    }
}

pub fn scripted(id: &str, role: AgentRole, log: &StartLog) -> CustomAgent {
    scripted_with(id, role, log, 0, &[])
}

pub fn scripted_with(id: &str, role: AgentRole, log: &StartLog, delay_ms: u64, fail: &[&str]) -> CustomAgent {
    CustomAgent::new(
        AgentProfile::new(id, id, role),
        Scripted {
            log: log.clone(),
            delay_ms,
            fail: fail.iter().map(|s| s.to_string()).collect(),
        },
    )
}

/// Blocks until released
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl TaskHandler for Gate {
    async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(AgentResult::success(&task.id, "", json!("released")))
    }
}

/// Returns an error instead of a result
pub struct Broken;

#[async_trait]
impl TaskHandler for Broken {
    async fn handle(&self, _task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
        anyhow::bail!("handler exploded")
    }
}
