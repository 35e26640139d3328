//! DAG workflow execution
//!
//! Steps run in waves:
//! - Pending steps with a failed or skipped dependency become skipped
//! - Ready steps (all dependencies completed) are picked by priority, at
//!   most one per agent and `max_concurrency` per wave
//! - The wave runs concurrently and every result is recorded before the
//!   next wave is picked
//!
//! Pending steps with nothing ready is a deadlock (a dependency cycle).

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};

use agent::{AgentResult, AgentTask};

use crate::engine::Orchestrator;
use crate::error::{OrchestratorError, Result};
use crate::events::OrchestratorEvent;
use crate::workflow::{StepStatus, Workflow, WorkflowStatus};

// ============================================================================
// Graph helpers
// ============================================================================

/// Structural checks: unique step ids matching their task ids, and every
/// dependency naming a step of the workflow
pub fn validate(workflow: &Workflow) -> Result<()> {
    let mut ids = HashSet::new();
    for step in &workflow.steps {
        if step.id != step.task.id {
            return Err(OrchestratorError::ValidationFailed(format!(
                "step '{}' wraps task '{}'",
                step.id, step.task.id
            )));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(OrchestratorError::ValidationFailed(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    for step in &workflow.steps {
        if let Some(missing) = step.task.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
            return Err(OrchestratorError::UnresolvedDependency {
                step: step.id.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

fn statuses(workflow: &Workflow) -> HashMap<&str, StepStatus> {
    workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.status))
        .collect()
}

/// Skip pending steps whose dependencies can no longer complete, to a
/// fixpoint; returns the skipped ids
pub fn skip_blocked(workflow: &mut Workflow) -> Result<Vec<String>> {
    let mut skipped = Vec::new();
    loop {
        let blocked: Vec<usize> = {
            let status = statuses(workflow);
            workflow
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.status == StepStatus::Pending)
                .filter(|(_, s)| {
                    s.task.dependencies.iter().any(|d| {
                        matches!(status.get(d.as_str()), Some(StepStatus::Failed | StepStatus::Skipped))
                    })
                })
                .map(|(i, _)| i)
                .collect()
        };
        if blocked.is_empty() {
            return Ok(skipped);
        }
        for i in blocked {
            workflow.steps[i].transition(StepStatus::Skipped)?;
            skipped.push(workflow.steps[i].id.clone());
        }
    }
}

/// Ids of steps still pending
pub fn pending_steps(workflow: &Workflow) -> Vec<String> {
    workflow
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .map(|s| s.id.clone())
        .collect()
}

/// Indices of pending steps whose dependencies all completed
pub fn ready_steps(workflow: &Workflow) -> Vec<usize> {
    let status = statuses(workflow);
    workflow
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status == StepStatus::Pending)
        .filter(|(_, s)| {
            s.task
                .dependencies
                .iter()
                .all(|d| status.get(d.as_str()) == Some(&StepStatus::Completed))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Pick one wave from the ready steps: priority first, then declaration
/// order; one step per agent and at most `limit` steps
pub fn select_wave(workflow: &Workflow, ready: &[usize], limit: usize) -> Vec<usize> {
    let mut ordered = ready.to_vec();
    ordered.sort_by_key(|&i| (Reverse(workflow.steps[i].task.priority), i));

    let mut agents = HashSet::new();
    ordered
        .into_iter()
        .filter(|&i| agents.insert(workflow.steps[i].agent_id.as_str()))
        .take(limit.max(1))
        .collect()
}

/// The task actually sent for a step, carrying its dependencies' outputs
pub fn dispatch_task(workflow: &Workflow, index: usize) -> AgentTask {
    let mut task = workflow.steps[index].task.clone();
    if !task.dependencies.is_empty() {
        let outputs: serde_json::Map<String, Value> = task
            .dependencies
            .iter()
            .map(|d| (d.clone(), workflow.context.get(d).cloned().unwrap_or(Value::Null)))
            .collect();
        task.metadata
            .insert("dependency_results".into(), Value::Object(outputs));
    }
    task.metadata
        .insert("workflow_id".into(), json!(workflow.id));
    task
}

// ============================================================================
// Execution
// ============================================================================

/// Removes a workflow from the active set however execution ends
struct ActiveWorkflow<'a> {
    orchestrator: &'a Orchestrator,
    id: String,
}

impl<'a> ActiveWorkflow<'a> {
    fn enter(orchestrator: &'a Orchestrator, workflow: &Workflow) -> Self {
        orchestrator
            .active_workflows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(workflow.id.clone(), workflow.name.clone());
        Self {
            orchestrator,
            id: workflow.id.clone(),
        }
    }
}

impl Drop for ActiveWorkflow<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .active_workflows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

impl Orchestrator {
    /// Run a workflow to completion, mutating its step states in place
    ///
    /// Step failures do not make this an error: they skip dependents and
    /// mark the workflow failed. Errors are structural (validation or a
    /// dependency cycle).
    pub async fn execute_workflow(&self, workflow: &mut Workflow) -> Result<()> {
        if let Err(e) = validate(workflow) {
            self.fail_workflow(workflow, &e);
            return Err(e);
        }

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = Some(Utc::now());
        workflow.completed_at = None;
        workflow.error = None;

        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, steps = workflow.steps.len(), "Workflow started");
        self.events.emit(OrchestratorEvent::WorkflowStarted {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            steps: workflow.steps.len(),
        });

        let started = Instant::now();
        let outcome = {
            let _active = ActiveWorkflow::enter(self, workflow);
            self.run_waves(workflow).await
        };

        if let Err(e) = outcome {
            self.fail_workflow(workflow, &e);
            return Err(e);
        }

        workflow.completed_at = Some(Utc::now());
        let failed = workflow.count(StepStatus::Failed);
        if failed == 0 {
            workflow.status = WorkflowStatus::Completed;
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(workflow_id = %workflow.id, duration_ms, "Workflow completed");
            self.events.emit(OrchestratorEvent::WorkflowCompleted {
                workflow_id: workflow.id.clone(),
                duration_ms,
            });
        } else {
            let error = format!(
                "{} step(s) failed, {} skipped",
                failed,
                workflow.count(StepStatus::Skipped)
            );
            tracing::warn!(workflow_id = %workflow.id, error = %error, "Workflow failed");
            workflow.status = WorkflowStatus::Failed;
            workflow.error = Some(error.clone());
            self.events.emit(OrchestratorEvent::WorkflowFailed {
                workflow_id: workflow.id.clone(),
                error,
            });
        }
        Ok(())
    }

    async fn run_waves(&self, workflow: &mut Workflow) -> Result<()> {
        let limit = self.config().max_concurrency;
        loop {
            for id in skip_blocked(workflow)? {
                tracing::info!(workflow_id = %workflow.id, step = %id, "Step skipped: a dependency did not complete");
            }

            let pending = pending_steps(workflow);
            if pending.is_empty() {
                return Ok(());
            }
            let ready = ready_steps(workflow);
            if ready.is_empty() {
                return Err(OrchestratorError::Deadlock { steps: pending });
            }

            let mut running = Vec::new();
            for index in select_wave(workflow, &ready, limit) {
                let task = dispatch_task(workflow, index);
                let agent_id = workflow.steps[index].agent_id.clone();
                match self.reserve(&agent_id).await {
                    Ok(guard) => {
                        workflow.steps[index].transition(StepStatus::Running)?;
                        running.push((index, guard, task));
                    }
                    Err(e) => {
                        // never reached the agent
                        self.report_dispatch_error(&task, Some(&agent_id), &e);
                        let step = &mut workflow.steps[index];
                        step.transition(StepStatus::Failed)?;
                        step.result = Some(AgentResult::failure(&step.id, &agent_id, e.kind(), e.to_string()));
                    }
                }
            }

            tracing::debug!(workflow_id = %workflow.id, wave = running.len(), "Dispatching wave");
            let finished = join_all(running.into_iter().map(|(index, guard, task)| async move {
                (index, self.run_reserved(guard, &task).await)
            }))
            .await;

            for (index, result) in finished {
                let step = &mut workflow.steps[index];
                if result.success {
                    workflow.context.insert(step.id.clone(), result.output.clone());
                }
                step.finish(result)?;
            }
        }
    }

    fn fail_workflow(&self, workflow: &mut Workflow, error: &OrchestratorError) {
        tracing::error!(workflow_id = %workflow.id, error = %error, "Workflow aborted");
        workflow.status = WorkflowStatus::Failed;
        workflow.error = Some(error.to_string());
        workflow.completed_at = Some(Utc::now());
        self.events.emit(OrchestratorEvent::WorkflowFailed {
            workflow_id: workflow.id.clone(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::Priority;

    use crate::workflow::WorkflowStep;

    fn step(id: &str, agent: &str, deps: &[&str]) -> WorkflowStep {
        let task = AgentTask::with_id(id, "execute", id).with_dependencies(deps.iter().copied());
        WorkflowStep::new(task, agent)
    }

    fn diamond() -> Workflow {
        Workflow::new("diamond")
            .with_step(step("a", "x", &[]))
            .with_step(step("b", "x", &["a"]))
            .with_step(step("c", "y", &["a"]))
            .with_step(step("d", "x", &["b", "c"]))
    }

    #[test]
    fn test_validate() {
        assert!(validate(&diamond()).is_ok());

        let dup = Workflow::new("dup")
            .with_step(step("a", "x", &[]))
            .with_step(step("a", "y", &[]));
        assert!(matches!(validate(&dup), Err(OrchestratorError::ValidationFailed(_))));

        let missing = Workflow::new("missing").with_step(step("a", "x", &["ghost"]));
        assert_eq!(
            validate(&missing).unwrap_err(),
            OrchestratorError::UnresolvedDependency {
                step: "a".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn test_ready_steps_follow_dependencies() {
        let mut workflow = diamond();
        assert_eq!(ready_steps(&workflow), vec![0]);

        workflow.steps[0].status = StepStatus::Completed;
        assert_eq!(ready_steps(&workflow), vec![1, 2]);

        workflow.steps[1].status = StepStatus::Completed;
        assert_eq!(ready_steps(&workflow), vec![2]);
    }

    #[test]
    fn test_skip_propagates_transitively() {
        let mut workflow = diamond();
        workflow.steps[0].status = StepStatus::Failed;

        let mut skipped = skip_blocked(&mut workflow).unwrap();
        skipped.sort();
        assert_eq!(skipped, vec!["b", "c", "d"]);
        assert!(pending_steps(&workflow).is_empty());
    }

    #[test]
    fn test_wave_prefers_priority_and_one_step_per_agent() {
        let mut workflow = Workflow::new("wave")
            .with_step(step("low", "x", &[]))
            .with_step(step("same-agent", "x", &[]))
            .with_step(step("other", "y", &[]))
            .with_step(step("third", "z", &[]));
        workflow.steps[1].task.priority = Priority::Critical;

        let ready = ready_steps(&workflow);
        let wave = select_wave(&workflow, &ready, 4);
        assert_eq!(wave, vec![1, 2, 3]);

        assert_eq!(select_wave(&workflow, &ready, 1), vec![1]);
    }

    #[test]
    fn test_dispatch_task_carries_dependency_outputs() {
        let workflow = diamond().with_context("b", json!({"value": 2}));
        let task = dispatch_task(&workflow, 3);
        assert_eq!(task.metadata["dependency_results"]["b"]["value"], 2);
        assert_eq!(task.metadata["dependency_results"]["c"], Value::Null);
        assert_eq!(task.metadata["workflow_id"], json!(workflow.id));

        let root = dispatch_task(&workflow, 0);
        assert!(!root.metadata.contains_key("dependency_results"));
    }
}
