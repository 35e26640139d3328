//! Errors raised inside agents and tools

use crate::task::ErrorKind;

/// Errors that can occur while an agent works on a task
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' is not allowed for this agent")]
    ToolNotAllowed { tool: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Sandbox required: code execution is disabled until a sandbox is configured")]
    SandboxRequired,

    #[error("Maximum iterations exceeded ({0})")]
    MaxIterationsExceeded(u32),

    #[error("Maximum tool calls exceeded ({0})")]
    MaxToolCallsExceeded(u32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl AgentError {
    /// Classification recorded on the failed result
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::ToolNotAllowed { .. } => ErrorKind::ValidationFailed,
            Self::ToolFailed { .. } => ErrorKind::ToolFailed,
            Self::SandboxRequired => ErrorKind::SandboxRequired,
            Self::MaxIterationsExceeded(_) => ErrorKind::MaxIterationsExceeded,
            Self::MaxToolCallsExceeded(_) => ErrorKind::MaxToolCallsExceeded,
            Self::InvalidInput(_) => ErrorKind::ValidationFailed,
            Self::PlanningFailed(_) => ErrorKind::PlanningFailed,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
        }
    }

    /// Classify an arbitrary error, looking through anyhow wrappers
    pub fn classify(error: &anyhow::Error) -> ErrorKind {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<AgentError>().map(AgentError::kind))
            .unwrap_or(ErrorKind::ExecutionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Result<()> = Err(AgentError::SandboxRequired.into());
        let err = err.context("running step").unwrap_err();
        assert_eq!(AgentError::classify(&err), ErrorKind::SandboxRequired);
    }

    #[test]
    fn test_classify_unknown() {
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(AgentError::classify(&err), ErrorKind::ExecutionFailed);
    }
}
