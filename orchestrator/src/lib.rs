//! Multi-agent orchestration
//!
//! This crate provides:
//! - An agent registry with atomic idle/busy tracking
//! - Task dispatch by explicit agent or by role inference, with timeouts
//! - A priority task queue
//! - DAG workflow execution in concurrent waves
//! - Planner-driven workflows and an agentic feedback loop
//! - Lifecycle events, hooks, and shared memory
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestrator::{FileConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::with_reference_agents(&FileConfig::load()?).await;
//! let mut workflow = orchestrator.plan_workflow("Build and test a feature", None).await?;
//! orchestrator.execute_workflow(&mut workflow).await?;
//! ```

pub mod agentic;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod workflow;

pub use agentic::{AgenticLoopOptions, TerminationCondition};
pub use config::{FileConfig, OrchestratorConfig};
pub use engine::{Orchestrator, OrchestratorStatus, TaskHooks};
pub use error::{OrchestratorError, Result};
pub use events::{EventReceiver, EventSender, OrchestratorEvent, SubscriptionId};
pub use registry::{AgentRegistry, AgentSlot, BusyGuard};
pub use workflow::{StepStatus, Workflow, WorkflowStatus, WorkflowStep};

/// Re-export commonly used types from the agent crate
pub use agent::{Agent, AgentResult, AgentRole, AgentStatus, AgentTask};
