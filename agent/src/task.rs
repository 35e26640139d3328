//! Task model shared by every agent and the orchestrator
//!
//! This module defines:
//! - Agent identity (role, status, capabilities)
//! - `AgentTask`, the immutable unit of work
//! - `AgentResult`, the id-correlated outcome with metrics and artifacts
//! - `ErrorKind`, the serializable failure taxonomy carried on results

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Agent Identity
// ============================================================================

/// Role an agent plays; the orchestrator routes on this alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Executor,
    Reviewer,
    Researcher,
    Coder,
    Analyst,
    Custom,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Researcher => "researcher",
            AgentRole::Coder => "coder",
            AgentRole::Analyst => "analyst",
            AgentRole::Custom => "custom",
        }
    }

    /// Infer the role best suited to a free-form task type
    ///
    /// Returns `None` when the type carries no routing hint.
    pub fn infer_from_task_type(task_type: &str) -> Option<Self> {
        match task_type.to_lowercase().as_str() {
            "plan" | "planning" | "decompose" | "optimize" => Some(AgentRole::Planner),
            "execute" | "tool" | "chain" | "parallel" | "conditional" | "run" | "verify" => {
                Some(AgentRole::Executor)
            }
            "review" | "validate" | "audit" | "security" => Some(AgentRole::Reviewer),
            "research" | "search" => Some(AgentRole::Researcher),
            "code" | "implement" | "refactor" => Some(AgentRole::Coder),
            "analyze" | "analysis" => Some(AgentRole::Analyst),
            _ => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing AgentRole from string
#[derive(Debug, Clone)]
pub struct ParseAgentRoleError(String);

impl fmt::Display for ParseAgentRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent role: {}", self.0)
    }
}

impl std::error::Error for ParseAgentRoleError {}

impl FromStr for AgentRole {
    type Err = ParseAgentRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planner" => Ok(AgentRole::Planner),
            "executor" => Ok(AgentRole::Executor),
            "reviewer" => Ok(AgentRole::Reviewer),
            "researcher" => Ok(AgentRole::Researcher),
            "coder" => Ok(AgentRole::Coder),
            "analyst" => Ok(AgentRole::Analyst),
            "custom" => Ok(AgentRole::Custom),
            _ => Err(ParseAgentRoleError(s.to_string())),
        }
    }
}

/// Runtime status of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AgentStatus {
    Idle = 0,
    Busy = 1,
    Error = 2,
    Offline = 3,
}

impl AgentStatus {
    /// Decode from the atomic representation used by the registry
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AgentStatus::Idle,
            1 => AgentStatus::Busy,
            2 => AgentStatus::Error,
            _ => AgentStatus::Offline,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Something an agent advertises it can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Identity half of an agent: what the orchestrator and planner see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }
}

/// Profile plus current status, as handed to the planner for allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_status")]
    pub status: AgentStatus,
}

fn default_status() -> AgentStatus {
    AgentStatus::Idle
}

impl AgentDescriptor {
    pub fn from_profile(profile: &AgentProfile, status: AgentStatus) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            role: profile.role,
            capabilities: profile.capabilities.clone(),
            status,
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Task priority, ordered low to critical
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// An immutable work request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,

    /// Free-form type used for role and operation routing
    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub input: Value,

    /// Ids of tasks (workflow steps) that must finish first
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Overrides the agent and orchestrator default timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AgentTask {
    /// Create a task with a generated id
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_id(
            format!("task-{}", uuid::Uuid::new_v4()),
            task_type,
            description,
        )
    }

    /// Create a task with a caller-chosen id
    pub fn with_id(
        id: impl Into<String>,
        task_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: description.into(),
            input: Value::Null,
            dependencies: Vec::new(),
            priority: Priority::Medium,
            deadline: None,
            timeout_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Look up a string field in the input object
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Failure taxonomy carried on failed results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AgentNotFound,
    AgentBusy,
    NoSuitableAgent,
    Timeout,
    Deadlock,
    UnresolvedDependency,
    ToolNotFound,
    ToolFailed,
    SandboxRequired,
    MaxIterationsExceeded,
    MaxToolCallsExceeded,
    PlanningFailed,
    ValidationFailed,
    ExecutionFailed,
}

impl ErrorKind {
    /// Short label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "agent_not_found",
            Self::AgentBusy => "agent_busy",
            Self::NoSuitableAgent => "no_suitable_agent",
            Self::Timeout => "timeout",
            Self::Deadlock => "deadlock",
            Self::UnresolvedDependency => "unresolved_dependency",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolFailed => "tool_failed",
            Self::SandboxRequired => "sandbox_required",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::MaxToolCallsExceeded => "max_tool_calls_exceeded",
            Self::PlanningFailed => "planning_failed",
            Self::ValidationFailed => "validation_failed",
            Self::ExecutionFailed => "execution_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Execution metrics attached to every result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    pub duration_ms: u64,
    /// Rough token estimate (characters / 4 of input plus output)
    pub tokens_used: u64,
    pub iterations: u32,
    pub tool_calls: u32,
}

/// Kind of content an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    Document,
    Data,
    Image,
    Other,
}

/// Typed, named content produced by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub content: Value,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, content: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            content,
        }
    }
}

/// Outcome of one task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub metrics: ResultMetrics,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub completed_at: DateTime<Utc>,
}

impl AgentResult {
    /// Successful result with the given output
    pub fn success(task_id: impl Into<String>, agent_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            success: true,
            output,
            error: None,
            error_kind: None,
            metrics: ResultMetrics::default(),
            artifacts: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Failed result carrying a message and its classification
    pub fn failure(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            success: false,
            output: Value::Null,
            error: Some(message.into()),
            error_kind: Some(kind),
            metrics: ResultMetrics::default(),
            artifacts: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: ResultMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Output rendered as plain text (strings unquoted)
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Rough token estimate used for cost metrics
pub fn estimate_tokens(values: &[&Value]) -> u64 {
    let chars: usize = values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.len(),
            Value::Null => 0,
            other => other.to_string().len(),
        })
        .sum();
    (chars as u64).div_ceil(4)
}
