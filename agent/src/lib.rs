//! Agent model and reference agents for multi-agent orchestration
//!
//! - `task`: tasks, results, roles, and the error taxonomy
//! - `agent`: the `Agent` trait and host-defined `CustomAgent`
//! - `tools`: the executor's tool registry and built-in tools
//! - `planner`, `executor`, `reviewer`: reference agents

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod planner;
pub mod reviewer;
pub mod task;
pub mod tools;

pub use agent::{failed_result, Agent, CustomAgent, TaskHandler};
pub use config::{ExecutorConfig, PlannerConfig, ReviewerConfig};
pub use context::{AgentConstraints, AgentContext, ConversationEntry, ConversationRole};
pub use error::AgentError;
pub use executor::ExecutorAgent;
pub use planner::{ExecutionPlan, PlanStep, PlannerAgent};
pub use reviewer::{ReviewResult, ReviewerAgent};
pub use task::{
    AgentDescriptor, AgentProfile, AgentResult, AgentRole, AgentStatus, AgentTask, Artifact,
    ArtifactKind, Capability, ErrorKind, Priority, ResultMetrics,
};
pub use tools::{Tool, ToolRegistry};
