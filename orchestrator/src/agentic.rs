//! Agentic loop
//!
//! Execute a task, then let a feedback agent decide what runs next. After a
//! failure the first registered reviewer is asked for a corrective task;
//! after a success only an explicit feedback agent can continue the loop.

use serde_json::json;

use agent::{AgentResult, AgentRole, AgentTask};

use crate::engine::Orchestrator;

/// Predicate ending the loop once it returns true
pub type TerminationCondition = Box<dyn Fn(&AgentResult) -> bool + Send + Sync>;

/// Agentic loop options
pub struct AgenticLoopOptions {
    pub max_iterations: usize,
    pub termination: Option<TerminationCondition>,
    /// Agent asked for a follow-up task after each success
    pub feedback_agent_id: Option<String>,
}

impl Default for AgenticLoopOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            termination: None,
            feedback_agent_id: None,
        }
    }
}

impl AgenticLoopOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_termination(mut self, condition: impl Fn(&AgentResult) -> bool + Send + Sync + 'static) -> Self {
        self.termination = Some(Box::new(condition));
        self
    }

    /// Stop at the first successful result
    pub fn until_success(self) -> Self {
        self.with_termination(|result| result.success)
    }

    pub fn with_feedback_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.feedback_agent_id = Some(agent_id.into());
        self
    }
}

impl Orchestrator {
    /// Run `initial` and its follow-ups; returns every result in order
    pub async fn agentic_loop(&self, initial: AgentTask, options: AgenticLoopOptions) -> Vec<AgentResult> {
        let mut results = Vec::new();
        let mut task = initial;

        for iteration in 1..=options.max_iterations {
            let result = match self.execute_task(&task, None).await {
                Ok(result) => result,
                Err(e) => AgentResult::failure(&task.id, "", e.kind(), e.to_string()),
            };
            tracing::debug!(iteration, task_id = %task.id, success = result.success, "Agentic iteration");
            results.push(result.clone());

            if options.termination.as_ref().is_some_and(|done| done(&result)) {
                break;
            }

            let advisor = if result.success {
                options.feedback_agent_id.clone()
            } else {
                self.first_agent_with_role(AgentRole::Reviewer).await
            };
            let next = match advisor {
                Some(agent_id) => self.next_task(&agent_id, &task, &result).await,
                None => None,
            };
            match next {
                Some(next) => task = next,
                None => break,
            }
        }

        results
    }

    /// Ask an agent for the task that should follow `result`
    async fn next_task(&self, agent_id: &str, task: &AgentTask, result: &AgentResult) -> Option<AgentTask> {
        let feedback = AgentTask::new("feedback", format!("Follow up on {}", task.id))
            .with_input(json!({ "task": task, "result": result }));
        match self.execute_task(&feedback, Some(agent_id)).await {
            Ok(reply) if reply.success => reply
                .output
                .get("next_task")
                .filter(|next| !next.is_null())
                .and_then(|next| serde_json::from_value(next.clone()).ok()),
            Ok(reply) => {
                tracing::warn!(agent_id, error = ?reply.error, "Feedback agent failed");
                None
            }
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "Feedback agent unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::{AgentContext, AgentProfile, CustomAgent, ErrorKind, TaskHandler};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::OrchestratorConfig;

    /// Fails the first `failures` calls
    struct Flaky {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Ok(AgentResult::failure(&task.id, "", ErrorKind::ExecutionFailed, "not yet"))
            } else {
                Ok(AgentResult::success(&task.id, "", Value::Null))
            }
        }
    }

    /// Always proposes a retry of the task it was given
    struct Retry;

    #[async_trait]
    impl TaskHandler for Retry {
        async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
            let original: AgentTask = serde_json::from_value(task.input["task"].clone())?;
            let next = AgentTask::new(original.task_type.clone(), original.description.clone());
            Ok(AgentResult::success(&task.id, "", json!({ "next_task": next })))
        }
    }

    async fn orchestrator(failures: usize) -> (Orchestrator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator
            .register_agent(CustomAgent::new(
                AgentProfile::new("exec", "exec", AgentRole::Executor),
                Flaky { calls: calls.clone(), failures },
            ))
            .await;
        (orchestrator, calls)
    }

    #[tokio::test]
    async fn test_stops_on_termination() {
        let (orchestrator, _) = orchestrator(0).await;
        let results = orchestrator
            .agentic_loop(AgentTask::new("execute", "go"), AgenticLoopOptions::default().until_success())
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_failure_without_reviewer_ends_loop() {
        let (orchestrator, calls) = orchestrator(5).await;
        let results = orchestrator
            .agentic_loop(AgentTask::new("execute", "go"), AgenticLoopOptions::default())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reviewer_retries_until_success() {
        let (orchestrator, _) = orchestrator(2).await;
        orchestrator
            .register_agent(CustomAgent::new(
                AgentProfile::new("rev", "rev", AgentRole::Reviewer),
                Retry,
            ))
            .await;

        let results = orchestrator
            .agentic_loop(AgentTask::new("execute", "go"), AgenticLoopOptions::default().until_success())
            .await;
        let outcomes: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(outcomes, vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let (orchestrator, _) = orchestrator(0).await;
        orchestrator
            .register_agent(CustomAgent::new(
                AgentProfile::new("fb", "fb", AgentRole::Custom),
                Retry,
            ))
            .await;

        let options = AgenticLoopOptions::default()
            .with_max_iterations(3)
            .with_feedback_agent("fb");
        let results = orchestrator
            .agentic_loop(AgentTask::new("execute", "go"), options)
            .await;
        assert_eq!(results.len(), 3);
    }
}
