//! Workflow definitions and step state
//!
//! A workflow is a set of steps, each binding one task to one agent.
//! Dependencies between steps come from `task.dependencies` and must name
//! other steps of the same workflow.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent::{AgentResult, AgentTask, Priority};

use crate::error::{OrchestratorError, Result};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of a single step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Forward-only transitions
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a whole workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

// ============================================================================
// Steps
// ============================================================================

/// One task bound to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Equal to `task.id`
    pub id: String,
    pub task: AgentTask,
    pub agent_id: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Caller-driven reruns; never incremented by the scheduler
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(task: AgentTask, agent_id: impl Into<String>) -> Self {
        Self {
            id: task.id.clone(),
            task,
            agent_id: agent_id.into(),
            status: StepStatus::Pending,
            retries: 0,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, stamping start/completion times
    pub fn transition(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                step: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == StepStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Record a finished result and move to completed/failed accordingly
    pub fn finish(&mut self, result: AgentResult) -> Result<()> {
        let next = if result.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.transition(next)?;
        self.result = Some(result);
        Ok(())
    }
}

// ============================================================================
// Workflow
// ============================================================================

/// A complete workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Step outputs keyed by step id, plus anything the caller seeds
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Workflow {
    /// Create an empty workflow with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("wf-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            status: WorkflowStatus::Pending,
            context: HashMap::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Add a step
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Return a failed step (and the steps skipped because of it) to
    /// pending so a later `execute_workflow` call reruns them
    pub fn reset_step_for_retry(&mut self, id: &str) -> Result<()> {
        let step = self
            .step_mut(id)
            .ok_or_else(|| OrchestratorError::ValidationFailed(format!("unknown step '{}'", id)))?;
        if step.status != StepStatus::Failed {
            return Err(OrchestratorError::InvalidTransition {
                step: id.to_string(),
                from: step.status,
                to: StepStatus::Pending,
            });
        }
        step.retries += 1;
        clear(step);

        // Skipped dependents, transitively
        let mut reset: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let next: Vec<usize> = self
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.status == StepStatus::Skipped)
                .filter(|(_, s)| s.task.dependencies.iter().any(|d| reset.contains(d)))
                .map(|(i, _)| i)
                .collect();
            if next.is_empty() {
                break;
            }
            for i in next {
                reset.insert(self.steps[i].id.clone());
                clear(&mut self.steps[i]);
            }
        }

        self.status = WorkflowStatus::Pending;
        self.error = None;
        self.completed_at = None;
        Ok(())
    }

    /// Load workflow from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Load workflow from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let definition: WorkflowDefinition =
            toml::from_str(toml_str).map_err(|e| OrchestratorError::Config(e.to_string()))?;
        Ok(definition.into_workflow())
    }
}

fn clear(step: &mut WorkflowStep) {
    step.status = StepStatus::Pending;
    step.result = None;
    step.started_at = None;
    step.completed_at = None;
}

// ============================================================================
// TOML definitions
// ============================================================================

/// File form of a workflow
#[derive(Debug, Clone, Deserialize)]
struct WorkflowDefinition {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    context: HashMap<String, Value>,
    #[serde(default)]
    steps: Vec<StepDefinition>,
}

/// File form of a step
#[derive(Debug, Clone, Deserialize)]
struct StepDefinition {
    id: String,
    /// Agent id the step runs on
    agent: String,
    #[serde(rename = "type")]
    task_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl WorkflowDefinition {
    fn into_workflow(self) -> Workflow {
        let mut workflow = Workflow::new(self.name).with_description(self.description);
        workflow.context = self.context;
        for def in self.steps {
            let mut task = AgentTask::with_id(def.id, def.task_type, def.description)
                .with_input(def.input)
                .with_dependencies(def.dependencies)
                .with_priority(def.priority);
            task.timeout_ms = def.timeout_ms;
            workflow.steps.push(WorkflowStep::new(task, def.agent));
        }
        workflow
    }
}
