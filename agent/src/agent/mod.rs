//! Agent contract
//!
//! An agent is a role-tagged unit of execution:
//! 1. It exposes an identity (`AgentProfile`)
//! 2. It owns a private `AgentContext` (memory, history, tools, constraints)
//! 3. It executes one task at a time and returns an `AgentResult`
//!
//! The orchestrator routes purely on the declared role and never looks at
//! the concrete type behind the trait object.

use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::AgentContext;
use crate::error::AgentError;
use crate::task::{estimate_tokens, AgentProfile, AgentResult, AgentTask, ResultMetrics};

/// A unit of execution that can be registered with the orchestrator
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity and advertised capabilities
    fn profile(&self) -> &AgentProfile;

    /// Private state
    fn context(&self) -> &AgentContext;

    /// Mutable private state
    fn context_mut(&mut self) -> &mut AgentContext;

    /// Execute one task
    ///
    /// Returning `Err` is treated as a failed task by callers; it never
    /// aborts sibling work.
    async fn execute(&mut self, task: &AgentTask) -> Result<AgentResult>;

    fn id(&self) -> &str {
        &self.profile().id
    }
}

/// Turn an execution error into a failed result with metrics attached
pub fn failed_result(
    task: &AgentTask,
    agent_id: &str,
    error: &anyhow::Error,
    started: Instant,
) -> AgentResult {
    AgentResult::failure(
        &task.id,
        agent_id,
        AgentError::classify(error),
        format!("{:#}", error),
    )
    .with_metrics(ResultMetrics {
        duration_ms: started.elapsed().as_millis() as u64,
        tokens_used: estimate_tokens(&[&task.input]),
        iterations: 1,
        tool_calls: 0,
    })
}

// ============================================================================
// Custom Agents
// ============================================================================

/// Caller-supplied behavior for a `CustomAgent`
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &AgentTask, context: &mut AgentContext) -> Result<AgentResult>;
}

/// Agent whose execute body is provided by the host application
pub struct CustomAgent {
    profile: AgentProfile,
    context: AgentContext,
    handler: Box<dyn TaskHandler>,
}

impl CustomAgent {
    pub fn new(profile: AgentProfile, handler: impl TaskHandler + 'static) -> Self {
        Self {
            profile,
            context: AgentContext::new(),
            handler: Box::new(handler),
        }
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }
}

#[async_trait]
impl Agent for CustomAgent {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn context(&self) -> &AgentContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.context
    }

    async fn execute(&mut self, task: &AgentTask) -> Result<AgentResult> {
        tracing::debug!(agent_id = %self.profile.id, task_id = %task.id, "Custom agent handling task");
        self.handler.handle(task, &mut self.context).await
    }
}
