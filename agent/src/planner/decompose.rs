//! Objective decomposition into a linear step list

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use super::plan::PlanStep;
use crate::task::{AgentRole, Priority};

/// A phase the objective's wording can trigger
struct Phase {
    pattern: Regex,
    task_type: &'static str,
    verb: &'static str,
    role: AgentRole,
    expected: &'static str,
}

static PHASES: LazyLock<Vec<Phase>> = LazyLock::new(|| {
    let phase = |pattern: &str,
                 task_type: &'static str,
                 verb: &'static str,
                 role: AgentRole,
                 expected: &'static str| Phase {
        pattern: Regex::new(pattern).unwrap(),
        task_type,
        verb,
        role,
        expected,
    };
    vec![
        phase(
            r"\b(research|analy[sz]|investigat)\w*",
            "research",
            "Research",
            AgentRole::Researcher,
            "Findings and constraints relevant to the objective",
        ),
        phase(
            r"\b(plan|design|architect)\w*",
            "design",
            "Design",
            AgentRole::Planner,
            "A design describing the approach",
        ),
        phase(
            r"\b(build|implement|create|develop)\w*",
            "implement",
            "Implement",
            AgentRole::Executor,
            "A working implementation",
        ),
        phase(
            r"\b(code|program|refactor|fix)\w*",
            "code",
            "Code",
            AgentRole::Coder,
            "Source changes",
        ),
    ]
});

/// Break an objective into ordered steps, each depending on the previous
///
/// Always ends with a verify step and a review step; the list is truncated
/// to `max_steps`.
pub fn decompose(objective: &str, max_steps: usize) -> Vec<PlanStep> {
    let text = objective.to_lowercase();

    let mut phases: Vec<(&str, String, AgentRole, &str, Priority)> = PHASES
        .iter()
        .filter(|phase| phase.pattern.is_match(&text))
        .map(|phase| {
            (
                phase.task_type,
                format!("{} {}", phase.verb, objective),
                phase.role,
                phase.expected,
                Priority::High,
            )
        })
        .collect();

    if phases.is_empty() {
        phases.push((
            "execute",
            format!("Carry out {}", objective),
            AgentRole::Executor,
            "The objective carried out",
            Priority::High,
        ));
    }
    phases.push((
        "verify",
        format!("Verify results of {}", objective),
        AgentRole::Executor,
        "Verification report",
        Priority::Medium,
    ));
    phases.push((
        "review",
        format!("Review {}", objective),
        AgentRole::Reviewer,
        "Review score and issues",
        Priority::Medium,
    ));

    let mut steps: Vec<PlanStep> = Vec::with_capacity(phases.len());
    for (index, (task_type, name, role, expected, priority)) in phases.into_iter().enumerate() {
        let dependencies = steps.last().map(|prev| vec![prev.id.clone()]).unwrap_or_default();
        steps.push(PlanStep {
            id: format!("step-{}", index + 1),
            name,
            task_type: task_type.to_string(),
            role,
            input: json!({ "objective": objective, "phase": task_type }),
            expected_output: expected.to_string(),
            dependencies,
            priority,
            estimated_duration_ms: None,
            risk: None,
        });
    }

    steps.truncate(max_steps.max(1));
    steps
}
