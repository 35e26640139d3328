//! Planner agent - objective decomposition and plan analysis
//!
//! Operations (selected by task type):
//! - `plan` (default): full `ExecutionPlan`
//! - `decompose`: step list only
//! - `dependencies`: dependency graph and critical path
//! - `allocate`: step -> agent allocation
//! - `risk`: risk assessment
//! - `optimize`: dependency levels for parallel scheduling
//! - `feedback`: turn a failed result into a retry task

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{failed_result, Agent};
use crate::config::PlannerConfig;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::task::{
    estimate_tokens, AgentDescriptor, AgentProfile, AgentResult, AgentRole, AgentTask, Capability,
    ResultMetrics,
};

pub mod analysis;
pub mod decompose;
pub mod plan;

pub use analysis::{
    allocate, assess_risk, critical_path, dependency_levels, estimate_duration_ms, has_cycle,
    milestones, reorder_by_level,
};
pub use decompose::decompose;
pub use plan::{
    ExecutionPlan, Milestone, PlanStep, ResourceAllocation, RiskAssessment, RiskFactor, RiskLevel,
};

/// Build the complete plan for an objective
pub fn build_plan(
    objective: &str,
    agents: &[AgentDescriptor],
    config: &PlannerConfig,
) -> Result<ExecutionPlan, AgentError> {
    let objective = objective.trim();
    if objective.is_empty() {
        return Err(AgentError::PlanningFailed("objective is empty".into()));
    }

    let mut steps = decompose(objective, config.max_steps);
    let critical = critical_path(&steps);
    for step in &mut steps {
        step.estimated_duration_ms = Some(config.step_duration_ms);
        if critical.len() > 5 && critical.contains(&step.id) {
            step.risk = Some("on a long critical path".to_string());
        }
    }

    Ok(ExecutionPlan {
        objective: objective.to_string(),
        allocations: allocate(&steps, agents),
        risk: assess_risk(&steps, &critical),
        milestones: milestones(&steps),
        estimated_duration_ms: estimate_duration_ms(steps.len(), config),
        critical_path: critical,
        steps,
    })
}

/// Retry task for a failed upstream result; `None` when it succeeded
pub fn retry_task(task: &AgentTask, result: &AgentResult) -> Option<AgentTask> {
    if result.success {
        return None;
    }
    let mut retry = AgentTask::new(&task.task_type, &task.description)
        .with_input(task.input.clone())
        .with_dependencies(task.dependencies.iter().cloned())
        .with_priority(task.priority);
    retry.timeout_ms = task.timeout_ms;
    retry.deadline = task.deadline;
    retry.metadata = task.metadata.clone();
    retry.metadata.insert(
        "previous_error".into(),
        json!(result.error.clone().unwrap_or_default()),
    );
    retry.metadata.insert("retry_of".into(), json!(task.id));
    Some(retry)
}

/// Reference planner agent
pub struct PlannerAgent {
    profile: AgentProfile,
    context: AgentContext,
    config: PlannerConfig,
}

impl PlannerAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: PlannerConfig) -> Self {
        let profile = AgentProfile::new(id, name, AgentRole::Planner)
            .with_capability(Capability::new("plan", "Build an execution plan for an objective"))
            .with_capability(Capability::new("decompose", "Split an objective into steps"))
            .with_capability(Capability::new("dependencies", "Compute the critical path"))
            .with_capability(Capability::new("allocate", "Assign steps to agents"))
            .with_capability(Capability::new("risk", "Assess plan risk"))
            .with_capability(Capability::new("optimize", "Group steps into parallel levels"))
            .with_capability(Capability::new("feedback", "Derive a retry task from a failure"));

        Self {
            profile,
            context: AgentContext::new(),
            config,
        }
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    fn objective(task: &AgentTask) -> String {
        task.input_str("objective")
            .map(str::to_string)
            .unwrap_or_else(|| task.description.clone())
    }

    fn agents(task: &AgentTask) -> Result<Vec<AgentDescriptor>, AgentError> {
        match task.input.get("available_agents") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| AgentError::InvalidInput(format!("available_agents: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    /// Steps supplied in `input.steps`, else decomposed from the objective
    fn steps(&self, task: &AgentTask) -> Result<Vec<PlanStep>, AgentError> {
        match task.input.get("steps") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| AgentError::InvalidInput(format!("steps: {}", e))),
            None => Ok(decompose(&Self::objective(task), self.config.max_steps)),
        }
    }

    fn run(&mut self, task: &AgentTask) -> Result<Value> {
        let output = match task.task_type.as_str() {
            "decompose" => json!({ "steps": self.steps(task)? }),
            "dependencies" => {
                let steps = self.steps(task)?;
                let graph: BTreeMap<&str, &Vec<String>> = steps
                    .iter()
                    .map(|s| (s.id.as_str(), &s.dependencies))
                    .collect();
                json!({
                    "graph": graph,
                    "critical_path": critical_path(&steps),
                    "cyclic": has_cycle(&steps),
                })
            }
            "allocate" => {
                let steps = self.steps(task)?;
                json!({ "allocations": allocate(&steps, &Self::agents(task)?) })
            }
            "risk" => {
                let steps = self.steps(task)?;
                serde_json::to_value(assess_risk(&steps, &critical_path(&steps)))?
            }
            "optimize" => {
                let steps = self.steps(task)?;
                let levels = dependency_levels(&steps);
                let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
                json!({
                    "levels": levels,
                    "steps": reorder_by_level(&steps),
                    "max_parallelism": max_parallelism,
                })
            }
            "feedback" => {
                let original: AgentTask = serde_json::from_value(task.input["task"].clone())
                    .map_err(|e| AgentError::InvalidInput(format!("feedback task: {}", e)))?;
                let result: AgentResult = serde_json::from_value(task.input["result"].clone())
                    .map_err(|e| AgentError::InvalidInput(format!("feedback result: {}", e)))?;
                json!({ "next_task": retry_task(&original, &result) })
            }
            _ => {
                let objective = Self::objective(task);
                let plan = build_plan(&objective, &Self::agents(task)?, &self.config)?;
                tracing::info!(
                    steps = plan.steps.len(),
                    risk = ?plan.risk.overall,
                    "Built execution plan"
                );
                let value = serde_json::to_value(&plan)?;
                self.context.remember("last_plan", value.clone());
                value
            }
        };
        Ok(output)
    }
}

#[async_trait]
impl Agent for PlannerAgent {
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
        let started = Instant::now();
        match self.run(task) {
            Ok(output) => {
                let metrics = ResultMetrics {
                    duration_ms: started.elapsed().as_millis() as u64,
                    tokens_used: estimate_tokens(&[&task.input, &output]),
                    iterations: 1,
                    tool_calls: 0,
                };
                Ok(AgentResult::success(&task.id, &self.profile.id, output).with_metrics(metrics))
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Planning failed");
                Ok(failed_result(task, &self.profile.id, &e, started))
            }
        }
    }
}
