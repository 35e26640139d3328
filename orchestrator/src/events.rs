//! Orchestrator lifecycle events
//!
//! Events are fanned out to every subscriber over unbounded mpsc channels.
//! Subscribers that dropped their receiver are pruned on the next send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use agent::{AgentResult, AgentRole, AgentTask};

// ============================================================================
// Events
// ============================================================================

/// Events emitted while the orchestrator works
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AgentRegistered {
        agent_id: String,
        role: AgentRole,
    },

    AgentUnregistered {
        agent_id: String,
    },

    TaskQueued {
        task_id: String,
        /// Queue length after the insert
        queue_len: usize,
    },

    TaskStarted {
        task: AgentTask,
        agent_id: String,
    },

    TaskCompleted {
        result: AgentResult,
    },

    TaskFailed {
        task_id: String,
        agent_id: Option<String>,
        error: String,
    },

    WorkflowStarted {
        workflow_id: String,
        name: String,
        steps: usize,
    },

    WorkflowCompleted {
        workflow_id: String,
        /// Milliseconds between start and completion
        duration_ms: u64,
    },

    WorkflowFailed {
        workflow_id: String,
        error: String,
    },
}

// ============================================================================
// Event Channel
// ============================================================================

/// Sender for orchestrator events
pub type EventSender = mpsc::UnboundedSender<OrchestratorEvent>;

/// Receiver for orchestrator events
pub type EventReceiver = mpsc::UnboundedReceiver<OrchestratorEvent>;

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = u64;

/// Subscriber set with explicit unsubscribe
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, EventSender>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> (SubscriptionId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Remove a subscriber; returns false for unknown ids
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&self, event: OrchestratorEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    // Never held across an await; a poisoned lock still holds a valid map
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, EventSender>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
