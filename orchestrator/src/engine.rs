//! Orchestrator core
//!
//! Owns:
//! - The agent registry (exactly one instance per agent id)
//! - A priority task queue
//! - A shared key/value store
//! - The set of running workflows
//!
//! Every dispatch marks the target agent busy through a `BusyGuard`, so the
//! agent is idle again however the call ends (success, error, timeout, or
//! the dispatching future being dropped).

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use agent::{
    failed_result, Agent, AgentDescriptor, AgentResult, AgentRole, AgentStatus, AgentTask,
    ConversationEntry, ConversationRole, ErrorKind, ExecutorAgent, PlanStep, PlannerAgent,
    Priority, ReviewerAgent,
};

use crate::config::{FileConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, EventReceiver, OrchestratorEvent, SubscriptionId};
use crate::registry::{AgentRegistry, BusyGuard};
use crate::workflow::{Workflow, WorkflowStep};

// ============================================================================
// Hooks and status
// ============================================================================

/// Synchronous caller callbacks around every dispatched task
pub trait TaskHooks: Send + Sync {
    fn on_task_start(&self, _task: &AgentTask, _agent_id: &str) {}

    fn on_task_complete(&self, _result: &AgentResult) {}

    fn on_task_error(&self, _task: &AgentTask, _error: &str) {}
}

/// Observability snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub registered_agents: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub queued_tasks: usize,
    pub active_workflows: usize,
}

/// Queue entry: higher priority first, FIFO within a priority
struct QueuedTask {
    seq: u64,
    task: AgentTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates registered agents
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: RwLock<AgentRegistry>,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    queue_seq: AtomicU64,
    shared_memory: RwLock<HashMap<String, Value>>,
    pub(crate) active_workflows: StdMutex<HashMap<String, String>>,
    pub(crate) events: EventBus,
    hooks: Option<Arc<dyn TaskHooks>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(AgentRegistry::new()),
            queue: Mutex::new(BinaryHeap::new()),
            queue_seq: AtomicU64::new(0),
            shared_memory: RwLock::new(HashMap::new()),
            active_workflows: StdMutex::new(HashMap::new()),
            events: EventBus::new(),
            hooks: None,
        }
    }

    /// Orchestrator with a planner, an executor, and a reviewer registered
    pub async fn with_reference_agents(config: &FileConfig) -> Self {
        let orchestrator = Self::new(config.orchestrator.clone());
        orchestrator
            .register_agent(PlannerAgent::new("planner", "Planner", config.planner.clone()))
            .await;
        orchestrator
            .register_agent(ExecutorAgent::new("executor", "Executor", config.executor.clone()))
            .await;
        orchestrator
            .register_agent(ReviewerAgent::new("reviewer", "Reviewer", config.reviewer.clone()))
            .await;
        orchestrator
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register an agent, replacing any agent with the same id
    pub async fn register_agent(&self, agent: impl Agent + 'static) -> AgentDescriptor {
        self.register_boxed(Box::new(agent)).await
    }

    pub async fn register_boxed(&self, agent: Box<dyn Agent>) -> AgentDescriptor {
        let slot = self.registry.write().await.insert(agent);
        let profile = slot.profile();
        tracing::info!(agent_id = %profile.id, role = %profile.role, "Agent registered");
        self.events.emit(OrchestratorEvent::AgentRegistered {
            agent_id: profile.id.clone(),
            role: profile.role,
        });
        slot.descriptor()
    }

    /// Remove an agent; false when the id is not registered
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.registry.write().await.remove(agent_id).is_some();
        if removed {
            tracing::info!(agent_id, "Agent unregistered");
            self.events.emit(OrchestratorEvent::AgentUnregistered {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.registry
            .read()
            .await
            .get(agent_id)
            .map(|slot| slot.descriptor())
    }

    pub async fn get_agents_by_role(&self, role: AgentRole) -> Vec<AgentDescriptor> {
        self.registry
            .read()
            .await
            .by_role(role)
            .iter()
            .map(|slot| slot.descriptor())
            .collect()
    }

    /// Every registered agent in registration order, whatever its status
    pub async fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.registry.read().await.descriptors()
    }

    /// Agents currently idle
    pub async fn get_available_agents(&self) -> Vec<AgentDescriptor> {
        self.registry
            .read()
            .await
            .descriptors()
            .into_iter()
            .filter(|agent| agent.status == AgentStatus::Idle)
            .collect()
    }

    /// Host-side status control (e.g. taking an agent offline)
    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let slot = self
            .registry
            .read()
            .await
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_string()))?;
        if slot.set_status(status) {
            Ok(())
        } else {
            Err(OrchestratorError::AgentBusy(agent_id.to_string()))
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Mark the named agent busy
    pub(crate) async fn reserve(&self, agent_id: &str) -> Result<BusyGuard> {
        let slot = self
            .registry
            .read()
            .await
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_string()))?;
        BusyGuard::try_acquire(&slot).ok_or_else(|| OrchestratorError::AgentBusy(agent_id.to_string()))
    }

    /// Mark an agent busy, chosen by role inference from the task type
    ///
    /// Tries the inferred role, then executors, then any agent; the first
    /// idle agent in registration order wins.
    async fn reserve_for(&self, task: &AgentTask) -> Result<BusyGuard> {
        let mut tiers = Vec::with_capacity(3);
        if let Some(role) = AgentRole::infer_from_task_type(&task.task_type) {
            tiers.push(Some(role));
        }
        tiers.push(Some(AgentRole::Executor));
        tiers.push(None);

        let registry = self.registry.read().await;
        for tier in tiers {
            let candidates = registry
                .iter()
                .filter(|slot| tier.is_none_or(|role| slot.profile().role == role));
            for slot in candidates {
                if let Some(guard) = BusyGuard::try_acquire(slot) {
                    return Ok(guard);
                }
            }
        }
        Err(OrchestratorError::NoSuitableAgent(task.task_type.clone()))
    }

    /// Effective timeout: task, then agent constraint, then default, clamped
    /// by the deadline. Zero when the deadline has already passed.
    fn timeout_ms(&self, task: &AgentTask, agent_timeout_ms: Option<u64>) -> u64 {
        let timeout = task
            .timeout_ms
            .or(agent_timeout_ms)
            .unwrap_or(self.config.default_timeout_ms);
        match task.deadline {
            Some(deadline) => {
                let remaining = (deadline - Utc::now()).num_milliseconds().max(0) as u64;
                timeout.min(remaining)
            }
            None => timeout,
        }
    }

    /// Execute a task on the named agent, or on one chosen by role
    ///
    /// Structural problems (unknown agent, busy agent, no candidate) are
    /// errors; everything that happens once the agent runs, including a
    /// timeout, comes back as a result.
    pub async fn execute_task(&self, task: &AgentTask, agent_id: Option<&str>) -> Result<AgentResult> {
        let reserved = match agent_id {
            Some(id) => self.reserve(id).await,
            None => self.reserve_for(task).await,
        };
        match reserved {
            Ok(guard) => Ok(self.run_reserved(guard, task).await),
            Err(e) => {
                self.report_dispatch_error(task, agent_id, &e);
                Err(e)
            }
        }
    }

    pub(crate) fn report_dispatch_error(
        &self,
        task: &AgentTask,
        agent_id: Option<&str>,
        error: &OrchestratorError,
    ) {
        tracing::warn!(task_id = %task.id, agent_id = ?agent_id, error = %error, "Task not dispatched");
        let message = error.to_string();
        if let Some(hooks) = &self.hooks {
            hooks.on_task_error(task, &message);
        }
        self.events.emit(OrchestratorEvent::TaskFailed {
            task_id: task.id.clone(),
            agent_id: agent_id.map(str::to_string),
            error: message,
        });
    }

    /// Run a task on an agent already marked busy; the agent is idle again
    /// once this returns
    pub(crate) async fn run_reserved(&self, guard: BusyGuard, task: &AgentTask) -> AgentResult {
        let result = self.run_guarded(&guard, task).await;
        drop(guard);
        result
    }

    /// Run a task while the caller keeps the agent busy
    async fn run_guarded(&self, guard: &BusyGuard, task: &AgentTask) -> AgentResult {
        let slot = guard.slot().clone();
        let agent_id = slot.id().to_string();
        let started = Instant::now();

        tracing::info!(task_id = %task.id, agent_id = %agent_id, task_type = %task.task_type, "Task started");
        self.events.emit(OrchestratorEvent::TaskStarted {
            task: task.clone(),
            agent_id: agent_id.clone(),
        });
        if let Some(hooks) = &self.hooks {
            hooks.on_task_start(task, &agent_id);
        }

        let mut agent = slot.agent().lock().await;
        let timeout_ms = self.timeout_ms(task, agent.context().timeout_ms());
        let outcome = if timeout_ms == 0 {
            None
        } else {
            tokio::time::timeout(Duration::from_millis(timeout_ms), agent.execute(task))
                .await
                .ok()
        };
        drop(agent);

        let mut result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(e)) => failed_result(task, &agent_id, &e, started),
            None => {
                let error = OrchestratorError::Timeout {
                    task_id: task.id.clone(),
                    timeout_ms,
                };
                AgentResult::failure(&task.id, &agent_id, ErrorKind::Timeout, error.to_string())
            }
        };
        result.task_id = task.id.clone();
        result.agent_id = agent_id.clone();
        result.metrics.duration_ms = started.elapsed().as_millis() as u64;

        if result.success {
            tracing::info!(task_id = %task.id, agent_id = %agent_id, duration_ms = result.metrics.duration_ms, "Task completed");
            if let Some(hooks) = &self.hooks {
                hooks.on_task_complete(&result);
            }
            self.events.emit(OrchestratorEvent::TaskCompleted {
                result: result.clone(),
            });
        } else {
            let error = result.error.clone().unwrap_or_default();
            tracing::warn!(task_id = %task.id, agent_id = %agent_id, error = %error, "Task failed");
            if let Some(hooks) = &self.hooks {
                hooks.on_task_error(task, &error);
            }
            self.events.emit(OrchestratorEvent::TaskFailed {
                task_id: task.id.clone(),
                agent_id: Some(agent_id.clone()),
                error,
            });
        }
        result
    }

    // ------------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------------

    /// Queue a task for `process_queue`; returns the queue length
    pub async fn enqueue_task(&self, task: AgentTask) -> usize {
        let task_id = task.id.clone();
        let seq = self.queue_seq.fetch_add(1, Ordering::Relaxed);
        let queue_len = {
            let mut queue = self.queue.lock().await;
            queue.push(QueuedTask { seq, task });
            queue.len()
        };
        tracing::debug!(task_id = %task_id, queue_len, "Task queued");
        self.events
            .emit(OrchestratorEvent::TaskQueued { task_id, queue_len });
        queue_len
    }

    /// Drain the queue in priority order, dispatching by role inference
    pub async fn process_queue(&self) -> Vec<AgentResult> {
        let mut results = Vec::new();
        loop {
            let next = self.queue.lock().await.pop();
            let Some(QueuedTask { task, .. }) = next else {
                break;
            };
            let result = match self.execute_task(&task, None).await {
                Ok(result) => result,
                Err(e) => AgentResult::failure(&task.id, "", e.kind(), e.to_string()),
            };
            results.push(result);
        }
        results
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    /// Ask the first registered planner for a plan and turn it into a workflow
    pub async fn plan_workflow(&self, objective: &str, context: Option<Value>) -> Result<Workflow> {
        let (planner, agents) = {
            let registry = self.registry.read().await;
            let planner = registry
                .by_role(AgentRole::Planner)
                .first()
                .map(|slot| slot.id().to_string());
            (planner, registry.descriptors())
        };
        let planner = planner.ok_or(OrchestratorError::NoPlannerAvailable)?;

        let task = AgentTask::new("plan", objective)
            .with_priority(Priority::High)
            .with_input(json!({
                "objective": objective,
                "available_agents": agents,
                "context": context,
            }));
        let result = self.execute_task(&task, Some(&planner)).await?;
        if !result.success {
            return Err(OrchestratorError::PlanningFailed(
                result.error.unwrap_or_else(|| "planner failed".to_string()),
            ));
        }

        let steps: Vec<PlanStep> = result
            .output
            .get("steps")
            .cloned()
            .and_then(|steps| serde_json::from_value(steps).ok())
            .unwrap_or_default();
        if steps.is_empty() {
            return Err(OrchestratorError::PlanningFailed(
                "planner returned no usable steps".to_string(),
            ));
        }

        let mut workflow = Workflow::new(format!("plan: {}", objective))
            .with_description(objective)
            .with_context("plan", result.output.clone());
        if let Some(context) = context {
            workflow.context.insert("objective_context".into(), context);
        }
        for step in &steps {
            let agent_id = best_match(step.role, &agents);
            workflow.steps.push(WorkflowStep::new(step.to_task(), agent_id));
        }

        tracing::info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "Workflow planned");
        Ok(workflow)
    }

    // ------------------------------------------------------------------------
    // Communication
    // ------------------------------------------------------------------------

    /// Send a message from one agent to another and return the reply text
    ///
    /// Both agents are held busy for the whole exchange, so either one being
    /// busy is an `AgentBusy` error. Histories are only written once the
    /// receiver has replied.
    pub async fn agent_communication(
        &self,
        from: &str,
        to: &str,
        message: &str,
        context: Option<Value>,
    ) -> Result<String> {
        if from == to {
            return Err(OrchestratorError::ValidationFailed(format!(
                "{} cannot message itself",
                from
            )));
        }
        let (sender, receiver) = {
            let registry = self.registry.read().await;
            let sender = registry
                .get(from)
                .ok_or_else(|| OrchestratorError::AgentNotFound(from.to_string()))?;
            let receiver = registry
                .get(to)
                .ok_or_else(|| OrchestratorError::AgentNotFound(to.to_string()))?;
            (sender, receiver)
        };

        let task = AgentTask::new("communication", message).with_input(json!({
            "message": message,
            "from": from,
            "context": context,
        }));
        let reserved = BusyGuard::try_acquire(&sender)
            .ok_or_else(|| OrchestratorError::AgentBusy(from.to_string()))
            .and_then(|sender_guard| {
                BusyGuard::try_acquire(&receiver)
                    .map(|receiver_guard| (sender_guard, receiver_guard))
                    .ok_or_else(|| OrchestratorError::AgentBusy(to.to_string()))
            });
        let (sender_guard, receiver_guard) = match reserved {
            Ok(guards) => guards,
            Err(e) => {
                self.report_dispatch_error(&task, Some(to), &e);
                return Err(e);
            }
        };

        let result = self.run_guarded(&receiver_guard, &task).await;
        if !result.success {
            return Err(OrchestratorError::ValidationFailed(format!(
                "{} could not reply: {}",
                to,
                result.error.unwrap_or_default()
            )));
        }
        let reply = match result.output.get("reply").and_then(Value::as_str) {
            Some(reply) => reply.to_string(),
            None => result.output_text(),
        };

        sender_guard.slot().agent().lock().await.context_mut().push_message(
            ConversationEntry::new(ConversationRole::User, message).with_peer(to),
        );
        let mut agent = receiver_guard.slot().agent().lock().await;
        let history = agent.context_mut();
        history.push_message(ConversationEntry::new(ConversationRole::User, message).with_peer(from));
        history.push_message(
            ConversationEntry::new(ConversationRole::Assistant, reply.clone()).with_peer(from),
        );
        Ok(reply)
    }

    // ------------------------------------------------------------------------
    // Shared memory
    // ------------------------------------------------------------------------

    pub async fn set_shared_memory(&self, key: impl Into<String>, value: Value) {
        self.shared_memory.write().await.insert(key.into(), value);
    }

    pub async fn get_shared_memory(&self, key: &str) -> Option<Value> {
        self.shared_memory.read().await.get(key).cloned()
    }

    pub async fn remove_shared_memory(&self, key: &str) -> Option<Value> {
        self.shared_memory.write().await.remove(key)
    }

    // ------------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------------

    pub async fn get_status(&self) -> OrchestratorStatus {
        let (registered_agents, idle_agents, busy_agents) = {
            let registry = self.registry.read().await;
            let statuses: Vec<AgentStatus> = registry.iter().map(|slot| slot.status()).collect();
            (
                statuses.len(),
                statuses.iter().filter(|s| **s == AgentStatus::Idle).count(),
                statuses.iter().filter(|s| **s == AgentStatus::Busy).count(),
            )
        };
        OrchestratorStatus {
            registered_agents,
            idle_agents,
            busy_agents,
            queued_tasks: self.queue.lock().await.len(),
            active_workflows: self.active_workflow_count(),
        }
    }

    pub(crate) fn active_workflow_count(&self) -> usize {
        self.active_workflows
            .lock()
            .map(|active| active.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> (SubscriptionId, EventReceiver) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Id of the first registered agent with the role
    pub async fn first_agent_with_role(&self, role: AgentRole) -> Option<String> {
        self.registry
            .read()
            .await
            .by_role(role)
            .first()
            .map(|slot| slot.id().to_string())
    }
}

/// First agent of the role, else the first executor, else the first agent
fn best_match(role: AgentRole, agents: &[AgentDescriptor]) -> String {
    agents
        .iter()
        .find(|a| a.role == role)
        .or_else(|| agents.iter().find(|a| a.role == AgentRole::Executor))
        .or_else(|| agents.first())
        .map(|a| a.id.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::{AgentContext, AgentProfile, CustomAgent, TaskHandler};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
            Ok(AgentResult::success(&task.id, "", json!({ "reply": format!("ack: {}", task.description) })))
        }
    }

    struct Sleepy(u64);

    #[async_trait]
    impl TaskHandler for Sleepy {
        async fn handle(&self, task: &AgentTask, _context: &mut AgentContext) -> anyhow::Result<AgentResult> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(AgentResult::success(&task.id, "", Value::Null))
        }
    }

    fn custom(id: &str, role: AgentRole, handler: impl TaskHandler + 'static) -> CustomAgent {
        CustomAgent::new(AgentProfile::new(id, id, role), handler)
    }

    #[derive(Default)]
    struct CountingHooks {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
    }

    impl TaskHooks for CountingHooks {
        fn on_task_start(&self, _task: &AgentTask, _agent_id: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_complete(&self, _result: &AgentResult) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_error(&self, _task: &AgentTask, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_role_inference_with_fallback() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_agent(custom("rev", AgentRole::Reviewer, Echo)).await;
        orchestrator.register_agent(custom("exec", AgentRole::Executor, Echo)).await;

        let review = orchestrator
            .execute_task(&AgentTask::new("review", "check"), None)
            .await
            .unwrap();
        assert_eq!(review.agent_id, "rev");

        // no coder registered: falls back to the executor
        let code = orchestrator
            .execute_task(&AgentTask::new("code", "write"), None)
            .await
            .unwrap();
        assert_eq!(code.agent_id, "exec");

        // unknown type with the executor offline: any idle agent
        orchestrator.set_agent_status("exec", AgentStatus::Offline).await.unwrap();
        let other = orchestrator
            .execute_task(&AgentTask::new("mystery", "?"), None)
            .await
            .unwrap();
        assert_eq!(other.agent_id, "rev");
    }

    #[tokio::test]
    async fn test_no_suitable_agent() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let err = orchestrator
            .execute_task(&AgentTask::new("plan", "x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoSuitableAgent(_)));

        let err = orchestrator
            .execute_task(&AgentTask::new("plan", "x"), Some("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentNotFound);
    }

    #[tokio::test]
    async fn test_task_timeout_releases_agent() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_default_timeout_ms(20));
        orchestrator.register_agent(custom("slow", AgentRole::Executor, Sleepy(1_000))).await;

        let result = orchestrator
            .execute_task(&AgentTask::new("execute", "wait"), Some("slow"))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(orchestrator.get_agent("slow").await.unwrap().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_task_timeout_override_and_deadline() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_default_timeout_ms(10));
        orchestrator.register_agent(custom("slow", AgentRole::Executor, Sleepy(30))).await;

        let patient = AgentTask::new("execute", "wait").with_timeout_ms(2_000);
        assert!(orchestrator.execute_task(&patient, None).await.unwrap().success);

        let expired = AgentTask::new("execute", "late")
            .with_timeout_ms(2_000)
            .with_deadline(Utc::now() - chrono::Duration::seconds(1));
        let result = orchestrator.execute_task(&expired, None).await.unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_hooks_and_events() {
        let hooks = Arc::new(CountingHooks::default());
        let orchestrator = Orchestrator::new(OrchestratorConfig::default()).with_hooks(hooks.clone());
        let (_, mut events) = orchestrator.subscribe();
        orchestrator.register_agent(custom("exec", AgentRole::Executor, Echo)).await;

        orchestrator
            .execute_task(&AgentTask::new("execute", "go"), None)
            .await
            .unwrap();
        let _ = orchestrator.execute_task(&AgentTask::new("execute", "go"), Some("ghost")).await;

        assert_eq!(hooks.started.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.completed.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.errors.load(Ordering::SeqCst), 1);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["agent_registered", "task_started", "task_completed", "task_failed"]
        );
    }

    #[tokio::test]
    async fn test_queue_priority_order() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_agent(custom("exec", AgentRole::Executor, Echo)).await;

        orchestrator
            .enqueue_task(AgentTask::with_id("low", "execute", "l").with_priority(Priority::Low))
            .await;
        orchestrator
            .enqueue_task(AgentTask::with_id("first-high", "execute", "h").with_priority(Priority::High))
            .await;
        orchestrator
            .enqueue_task(AgentTask::with_id("critical", "execute", "c").with_priority(Priority::Critical))
            .await;
        let len = orchestrator
            .enqueue_task(AgentTask::with_id("second-high", "execute", "h").with_priority(Priority::High))
            .await;
        assert_eq!(len, 4);
        assert_eq!(orchestrator.get_status().await.queued_tasks, 4);

        let order: Vec<_> = orchestrator
            .process_queue()
            .await
            .into_iter()
            .map(|r| r.task_id)
            .collect();
        assert_eq!(order, vec!["critical", "first-high", "second-high", "low"]);
        assert_eq!(orchestrator.get_status().await.queued_tasks, 0);
    }

    #[tokio::test]
    async fn test_shared_memory() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.set_shared_memory("k", json!({"v": 1})).await;
        assert_eq!(orchestrator.get_shared_memory("k").await, Some(json!({"v": 1})));
        assert_eq!(orchestrator.remove_shared_memory("k").await, Some(json!({"v": 1})));
        assert!(orchestrator.get_shared_memory("k").await.is_none());
    }

    #[tokio::test]
    async fn test_agent_communication_records_history() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_agent(custom("alice", AgentRole::Custom, Echo)).await;
        orchestrator.register_agent(custom("bob", AgentRole::Custom, Echo)).await;

        let reply = orchestrator
            .agent_communication("alice", "bob", "hello", None)
            .await
            .unwrap();
        assert_eq!(reply, "ack: hello");

        let registry = orchestrator.registry.read().await;
        let alice = registry.get("alice").unwrap();
        let bob = registry.get("bob").unwrap();
        assert_eq!(alice.agent().lock().await.context().history.len(), 1);
        let bob_history = bob.agent().lock().await.context().history.clone();
        assert_eq!(bob_history.len(), 2);
        assert_eq!(bob_history[1].content, "ack: hello");
        assert_eq!(bob_history[1].peer.as_deref(), Some("alice"));
        drop(registry);

        let err = orchestrator
            .agent_communication("alice", "nobody", "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::AgentNotFound("nobody".into()));
    }

    #[tokio::test]
    async fn test_agent_communication_writes_no_history_without_reply() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default().with_default_timeout_ms(20));
        orchestrator.register_agent(custom("alice", AgentRole::Custom, Echo)).await;
        orchestrator.register_agent(custom("bob", AgentRole::Custom, Echo)).await;
        orchestrator.register_agent(custom("slow", AgentRole::Custom, Sleepy(500))).await;
        // receiver busy
        let held = orchestrator.reserve("bob").await.unwrap();
        let err = orchestrator
            .agent_communication("alice", "bob", "hello", None)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::AgentBusy("bob".into()));
        drop(held);
        assert_eq!(orchestrator.get_agent("alice").await.unwrap().status, AgentStatus::Idle);

        // receiver times out
        let err = orchestrator
            .agent_communication("alice", "slow", "hello", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let err = orchestrator
            .agent_communication("alice", "alice", "hello", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        for id in ["alice", "bob", "slow"] {
            let slot = orchestrator.registry.read().await.get(id).unwrap();
            assert!(slot.agent().lock().await.context().history.is_empty(), "{}", id);
            assert_eq!(orchestrator.get_agent(id).await.unwrap().status, AgentStatus::Idle, "{}", id);
        }
    }

    #[tokio::test]
    async fn test_list_agents_includes_every_status() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_agent(custom("a", AgentRole::Executor, Echo)).await;
        orchestrator.register_agent(custom("b", AgentRole::Reviewer, Echo)).await;
        orchestrator.register_agent(custom("c", AgentRole::Coder, Echo)).await;
        orchestrator.set_agent_status("b", AgentStatus::Offline).await.unwrap();
        let held = orchestrator.reserve("c").await.unwrap();

        let agents = orchestrator.list_agents().await;
        let listed: Vec<_> = agents.iter().map(|a| (a.id.as_str(), a.status)).collect();
        assert_eq!(
            listed,
            vec![("a", AgentStatus::Idle), ("b", AgentStatus::Offline), ("c", AgentStatus::Busy)]
        );
        assert_eq!(orchestrator.get_available_agents().await.len(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn test_unregister_is_noop_safe() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_agent(custom("a", AgentRole::Executor, Echo)).await;
        assert!(orchestrator.unregister_agent("a").await);
        assert!(!orchestrator.unregister_agent("a").await);
        assert_eq!(orchestrator.get_status().await.registered_agents, 0);
    }

    #[test]
    fn test_best_match() {
        let agents: Vec<AgentDescriptor> = [
            ("p", AgentRole::Planner),
            ("e", AgentRole::Executor),
            ("r", AgentRole::Reviewer),
        ]
        .iter()
        .map(|(id, role)| AgentDescriptor::from_profile(&AgentProfile::new(*id, *id, *role), AgentStatus::Idle))
        .collect();
        assert_eq!(best_match(AgentRole::Reviewer, &agents), "r");
        assert_eq!(best_match(AgentRole::Coder, &agents), "e");
        assert_eq!(best_match(AgentRole::Coder, &agents[..1]), "p");
    }
}
