//! Execution plan types produced by the planner

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{AgentRole, AgentTask, Priority};

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    /// Task type the step is dispatched with
    #[serde(rename = "type")]
    pub task_type: String,
    pub role: AgentRole,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
}

impl PlanStep {
    /// The task a workflow runs for this step (task id = step id)
    pub fn to_task(&self) -> AgentTask {
        let mut task = AgentTask::with_id(&self.id, &self.task_type, &self.name)
            .with_input(self.input.clone())
            .with_dependencies(self.dependencies.iter().cloned())
            .with_priority(self.priority)
            .with_metadata("role", Value::String(self.role.to_string()));
        if !self.expected_output.is_empty() {
            task = task.with_metadata("expected_output", Value::String(self.expected_output.clone()));
        }
        task
    }
}

/// Steps assigned to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub agent_id: String,
    pub role: AgentRole,
    pub step_ids: Vec<String>,
    /// Assigned steps / total steps
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub description: String,
    pub probability: f64,
    pub impact: f64,
    pub mitigation: String,
}

impl RiskFactor {
    pub fn exposure(&self) -> f64 {
        self.probability * self.impact
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    /// Mean exposure (probability x impact) across factors
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

/// Progress marker: reached once `step_index` steps are done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub percent: u8,
    pub step_index: usize,
    pub step_id: String,
}

/// Full planner output for an objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub objective: String,
    pub steps: Vec<PlanStep>,
    pub critical_path: Vec<String>,
    pub allocations: Vec<ResourceAllocation>,
    pub risk: RiskAssessment,
    pub milestones: Vec<Milestone>,
    pub estimated_duration_ms: u64,
}
