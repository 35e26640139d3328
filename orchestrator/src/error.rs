//! Orchestrator errors

use agent::ErrorKind;

use crate::workflow::StepStatus;

/// Structural failures raised by the orchestrator
///
/// Task-level failures are reported as failed `AgentResult`s instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent is busy: {0}")]
    AgentBusy(String),

    #[error("No suitable agent for task type '{0}'")]
    NoSuitableAgent(String),

    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: String, timeout_ms: u64 },

    #[error("Deadlock: no runnable steps while {} remain pending ({})", .steps.len(), .steps.join(", "))]
    Deadlock { steps: Vec<String> },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnresolvedDependency { step: String, dependency: String },

    #[error("No planner agent registered")]
    NoPlannerAvailable,

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Step '{step}' cannot move from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Config error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Classification recorded on failed results
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound(_) => ErrorKind::AgentNotFound,
            Self::AgentBusy(_) => ErrorKind::AgentBusy,
            Self::NoSuitableAgent(_) => ErrorKind::NoSuitableAgent,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Deadlock { .. } => ErrorKind::Deadlock,
            Self::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
            Self::NoPlannerAvailable | Self::PlanningFailed(_) => ErrorKind::PlanningFailed,
            Self::ValidationFailed(_) | Self::InvalidTransition { .. } | Self::Config(_) => {
                ErrorKind::ValidationFailed
            }
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
