//! Plan analysis algorithms
//!
//! - Critical path: longest dependency chain, memoized, cycles cut
//! - Dependency levels for parallel scheduling
//! - Round-robin resource allocation by role
//! - Risk scoring from structural factors
//! - Milestones and duration estimates

use std::collections::HashMap;

use super::plan::{Milestone, PlanStep, ResourceAllocation, RiskAssessment, RiskFactor, RiskLevel};
use crate::config::PlannerConfig;
use crate::task::{AgentDescriptor, AgentRole, AgentStatus};

// ============================================================================
// Dependency graph
// ============================================================================

/// Step id -> declaration index, with each step's resolvable dependencies
struct Graph<'a> {
    ids: Vec<&'a str>,
    deps: Vec<Vec<usize>>,
}

impl<'a> Graph<'a> {
    fn new(steps: &'a [PlanStep]) -> Self {
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let deps = steps
            .iter()
            .map(|s| {
                let mut deps: Vec<usize> = s
                    .dependencies
                    .iter()
                    .filter_map(|d| index.get(d.as_str()).copied())
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect();
        Self {
            ids: steps.iter().map(|s| s.id.as_str()).collect(),
            deps,
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    /// Depth of every node (1 for a root) and the dependency it was reached
    /// from
    ///
    /// Depth-first with an explicit stack so long chains cannot exhaust the
    /// thread stack. A dependency still on the stack is a back edge and is
    /// skipped, which cuts cycles.
    fn depths(&self) -> Vec<(usize, Option<usize>)> {
        let n = self.len();
        let mut memo: Vec<Option<(usize, Option<usize>)>> = vec![None; n];
        let mut on_stack = vec![false; n];
        // (node, next dependency to visit, best (depth, dependency) so far)
        let mut stack: Vec<(usize, usize, Option<(usize, usize)>)> = Vec::new();

        for root in 0..n {
            if memo[root].is_some() {
                continue;
            }
            on_stack[root] = true;
            stack.push((root, 0, None));

            while let Some(&(node, next, best)) = stack.last() {
                let top = stack.len() - 1;
                if let Some(&dep) = self.deps[node].get(next) {
                    stack[top].1 += 1;
                    if on_stack[dep] {
                        continue;
                    }
                    match memo[dep] {
                        // Deps are sorted, so strict > keeps the earliest on ties
                        Some((depth, _)) => {
                            if best.map_or(true, |(d, _)| depth > d) {
                                stack[top].2 = Some((depth, dep));
                            }
                        }
                        None => {
                            on_stack[dep] = true;
                            stack.push((dep, 0, None));
                        }
                    }
                    continue;
                }

                stack.pop();
                on_stack[node] = false;
                let result = match best {
                    Some((depth, dep)) => (depth + 1, Some(dep)),
                    None => (1, None),
                };
                memo[node] = Some(result);
                if let Some(parent) = stack.last_mut() {
                    if parent.2.map_or(true, |(d, _)| result.0 > d) {
                        parent.2 = Some((result.0, node));
                    }
                }
            }
        }
        memo.into_iter().map(|m| m.unwrap_or((1, None))).collect()
    }

    fn has_cycle(&self) -> bool {
        // 0 = unvisited, 1 = visiting, 2 = done
        let mut state = vec![0u8; self.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();
        for root in 0..self.len() {
            if state[root] != 0 {
                continue;
            }
            state[root] = 1;
            stack.push((root, 0));
            while let Some(&(node, next)) = stack.last() {
                let top = stack.len() - 1;
                match self.deps[node].get(next) {
                    Some(&dep) => {
                        stack[top].1 += 1;
                        match state[dep] {
                            1 => return true,
                            0 => {
                                state[dep] = 1;
                                stack.push((dep, 0));
                            }
                            _ => {}
                        }
                    }
                    None => {
                        state[node] = 2;
                        stack.pop();
                    }
                }
            }
        }
        false
    }
}

/// Longest dependency chain, first step to last
///
/// Ties are resolved in favour of the earliest declared step.
pub fn critical_path(steps: &[PlanStep]) -> Vec<String> {
    let graph = Graph::new(steps);
    if graph.len() == 0 {
        return Vec::new();
    }
    let depths = graph.depths();

    let mut end = 0;
    for (i, (depth, _)) in depths.iter().enumerate() {
        if *depth > depths[end].0 {
            end = i;
        }
    }

    let mut path = vec![graph.ids[end].to_string()];
    let mut current = end;
    while let Some(prev) = depths[current].1 {
        path.push(graph.ids[prev].to_string());
        current = prev;
    }
    path.reverse();
    path
}

/// Whether the declared dependencies contain a cycle
pub fn has_cycle(steps: &[PlanStep]) -> bool {
    Graph::new(steps).has_cycle()
}

/// Group step ids by dependency level (level 0 has no dependencies)
pub fn dependency_levels(steps: &[PlanStep]) -> Vec<Vec<String>> {
    let graph = Graph::new(steps);
    let depths = graph.depths();
    let mut levels: Vec<Vec<String>> = Vec::new();
    for (i, (depth, _)) in depths.iter().enumerate() {
        let level = depth - 1;
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(graph.ids[i].to_string());
    }
    levels
}

/// Steps reordered by (level, declaration order)
pub fn reorder_by_level(steps: &[PlanStep]) -> Vec<PlanStep> {
    let depths = Graph::new(steps).depths();
    let mut order: Vec<usize> = (0..steps.len()).collect();
    order.sort_by_key(|&i| (depths[i].0, i));
    order.into_iter().map(|i| steps[i].clone()).collect()
}

// ============================================================================
// Resource allocation
// ============================================================================

/// Assign steps to agents, round-robin within each role
///
/// Roles with no agent fall back to the first idle agent, else the first
/// agent. Returns nothing when there are no agents.
pub fn allocate(steps: &[PlanStep], agents: &[AgentDescriptor]) -> Vec<ResourceAllocation> {
    if agents.is_empty() || steps.is_empty() {
        return Vec::new();
    }

    let fallback = agents
        .iter()
        .find(|a| a.status == AgentStatus::Idle)
        .unwrap_or(&agents[0]);

    let mut cursors: HashMap<AgentRole, usize> = HashMap::new();
    let mut allocations: Vec<ResourceAllocation> = Vec::new();

    for step in steps {
        let candidates: Vec<&AgentDescriptor> =
            agents.iter().filter(|a| a.role == step.role).collect();
        let agent = if candidates.is_empty() {
            fallback
        } else {
            let cursor = cursors.entry(step.role).or_insert(0);
            let chosen = candidates[*cursor % candidates.len()];
            *cursor += 1;
            chosen
        };

        match allocations.iter_mut().find(|a| a.agent_id == agent.id) {
            Some(allocation) => allocation.step_ids.push(step.id.clone()),
            None => allocations.push(ResourceAllocation {
                agent_id: agent.id.clone(),
                role: agent.role,
                step_ids: vec![step.id.clone()],
                utilization: 0.0,
            }),
        }
    }

    let total = steps.len() as f64;
    for allocation in &mut allocations {
        allocation.utilization = allocation.step_ids.len() as f64 / total;
    }
    allocations
}

// ============================================================================
// Risk, milestones, duration
// ============================================================================

/// Score structural risks of a plan
///
/// Factors:
/// - more than 10 steps (p 0.7, i 0.8)
/// - critical path longer than 5 (p 0.6, i 0.6)
/// - one role owning more than half the steps (p 0.5, i 0.5)
///
/// Overall level from mean exposure: < 0.3 low, < 0.6 medium, else high.
pub fn assess_risk(steps: &[PlanStep], critical_path: &[String]) -> RiskAssessment {
    let mut factors = Vec::new();

    if steps.len() > 10 {
        factors.push(RiskFactor {
            name: "high_complexity".into(),
            description: format!("Plan has {} steps", steps.len()),
            probability: 0.7,
            impact: 0.8,
            mitigation: "Split the objective into smaller plans".into(),
        });
    }

    if critical_path.len() > 5 {
        factors.push(RiskFactor {
            name: "long_critical_path".into(),
            description: format!("Critical path spans {} steps", critical_path.len()),
            probability: 0.6,
            impact: 0.6,
            mitigation: "Remove dependencies so more steps can run in parallel".into(),
        });
    }

    let mut by_role: Vec<(AgentRole, usize)> = Vec::new();
    for step in steps {
        match by_role.iter_mut().find(|(role, _)| *role == step.role) {
            Some((_, count)) => *count += 1,
            None => by_role.push((step.role, 1)),
        }
    }
    if let Some((role, count)) = by_role.iter().find(|(_, count)| *count * 2 > steps.len()) {
        factors.push(RiskFactor {
            name: "role_bottleneck".into(),
            description: format!("{} of {} steps need a {}", count, steps.len(), role),
            probability: 0.5,
            impact: 0.5,
            mitigation: format!("Register additional {} agents", role),
        });
    }

    let score = if factors.is_empty() {
        0.0
    } else {
        factors.iter().map(RiskFactor::exposure).sum::<f64>() / factors.len() as f64
    };
    let overall = if score < 0.3 {
        RiskLevel::Low
    } else if score < 0.6 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    RiskAssessment {
        overall,
        score,
        factors,
    }
}

/// Milestones at 25/50/75/100% of the step list
pub fn milestones(steps: &[PlanStep]) -> Vec<Milestone> {
    if steps.is_empty() {
        return Vec::new();
    }
    let n = steps.len();
    [25u8, 50, 75, 100]
        .into_iter()
        .map(|percent| {
            let step_index = (n * percent as usize).div_ceil(100).max(1);
            Milestone {
                name: if percent == 100 {
                    "Objective complete".to_string()
                } else {
                    format!("{}% complete", percent)
                },
                percent,
                step_index,
                step_id: steps[step_index - 1].id.clone(),
            }
        })
        .collect()
}

/// Estimated wall time: steps x step duration x parallel factor
pub fn estimate_duration_ms(step_count: usize, config: &PlannerConfig) -> u64 {
    (step_count as f64 * config.step_duration_ms as f64 * config.parallel_factor).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::decompose::decompose;
    use crate::task::{AgentProfile, Priority};
    use serde_json::Value;

    fn step(id: &str, role: AgentRole, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            name: id.to_string(),
            task_type: "execute".to_string(),
            role,
            input: Value::Null,
            expected_output: String::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            priority: Priority::Medium,
            estimated_duration_ms: None,
            risk: None,
        }
    }

    fn agent(id: &str, role: AgentRole, status: AgentStatus) -> AgentDescriptor {
        AgentDescriptor::from_profile(&AgentProfile::new(id, id, role), status)
    }

    #[test]
    fn test_critical_path_linear() {
        let steps = decompose("build and test a feature", 10);
        assert_eq!(critical_path(&steps), vec!["step-1", "step-2", "step-3"]);
    }

    #[test]
    fn test_critical_path_diamond_prefers_earliest() {
        let steps = vec![
            step("a", AgentRole::Executor, &[]),
            step("b", AgentRole::Executor, &["a"]),
            step("c", AgentRole::Executor, &["a"]),
            step("d", AgentRole::Executor, &["c", "b"]),
        ];
        assert_eq!(critical_path(&steps), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_critical_path_cuts_cycles() {
        let steps = vec![
            step("a", AgentRole::Executor, &["c"]),
            step("b", AgentRole::Executor, &["a"]),
            step("c", AgentRole::Executor, &["b"]),
        ];
        assert!(has_cycle(&steps));
        assert_eq!(critical_path(&steps).len(), 3);
        assert!(!has_cycle(&decompose("fix it", 10)));
    }

    #[test]
    fn test_long_chain_declared_last_first() {
        // each step depends on the one declared after it
        let n = 100_000;
        let ids: Vec<String> = (0..n).map(|i| format!("s{}", i)).collect();
        let steps: Vec<PlanStep> = (0..n)
            .map(|i| match ids.get(i + 1) {
                Some(next) => step(&ids[i], AgentRole::Executor, &[next.as_str()]),
                None => step(&ids[i], AgentRole::Executor, &[]),
            })
            .collect();

        assert!(!has_cycle(&steps));
        let path = critical_path(&steps);
        assert_eq!(path.len(), n);
        assert_eq!(path.first().unwrap(), &ids[n - 1]);
        assert_eq!(path.last().unwrap(), "s0");

        let levels = dependency_levels(&steps);
        assert_eq!(levels.len(), n);
        assert_eq!(levels[0], vec![ids[n - 1].clone()]);
    }

    #[test]
    fn test_dependency_levels_and_reorder() {
        let steps = vec![
            step("d", AgentRole::Executor, &["b", "c"]),
            step("b", AgentRole::Executor, &["a"]),
            step("a", AgentRole::Executor, &[]),
            step("c", AgentRole::Executor, &["a"]),
        ];
        let levels = dependency_levels(&steps);
        assert_eq!(levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);

        let ids: Vec<_> = reorder_by_level(&steps).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_allocate_round_robin_and_fallback() {
        let steps = vec![
            step("s1", AgentRole::Executor, &[]),
            step("s2", AgentRole::Executor, &[]),
            step("s3", AgentRole::Executor, &[]),
            step("s4", AgentRole::Researcher, &[]),
        ];
        let agents = vec![
            agent("busy-planner", AgentRole::Planner, AgentStatus::Busy),
            agent("e1", AgentRole::Executor, AgentStatus::Idle),
            agent("e2", AgentRole::Executor, AgentStatus::Idle),
        ];

        let allocations = allocate(&steps, &agents);
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].agent_id, "e1");
        assert_eq!(allocations[0].step_ids, vec!["s1", "s3", "s4"]);
        assert_eq!(allocations[1].step_ids, vec!["s2"]);
        assert!((allocations[0].utilization - 0.75).abs() < 1e-9);
        assert!(allocate(&steps, &[]).is_empty());
    }

    #[test]
    fn test_risk_levels() {
        let small = decompose("build and test a feature", 10);
        let risk = assess_risk(&small, &critical_path(&small));
        // executor owns 2 of 3 steps
        assert_eq!(risk.factors.len(), 1);
        assert_eq!(risk.factors[0].name, "role_bottleneck");
        assert_eq!(risk.overall, RiskLevel::Low);

        let chain: Vec<PlanStep> = (0..12)
            .map(|i| {
                let prev = format!("s{}", i.max(1) - 1);
                let deps: Vec<&str> = if i == 0 { vec![] } else { vec![prev.as_str()] };
                step(&format!("s{}", i), AgentRole::Executor, &deps)
            })
            .collect();
        let risk = assess_risk(&chain, &critical_path(&chain));
        assert_eq!(risk.factors.len(), 3);
        // (0.56 + 0.36 + 0.25) / 3 = 0.39
        assert_eq!(risk.overall, RiskLevel::Medium);

        let empty = assess_risk(&[], &[]);
        assert_eq!(empty.overall, RiskLevel::Low);
        assert!(empty.factors.is_empty());
    }

    #[test]
    fn test_milestones() {
        let steps = decompose("build and test a feature", 10);
        let marks = milestones(&steps);
        let indexes: Vec<_> = marks.iter().map(|m| m.step_index).collect();
        assert_eq!(indexes, vec![1, 2, 3, 3]);
        assert_eq!(marks[3].step_id, "step-3");
        assert!(milestones(&[]).is_empty());
    }

    #[test]
    fn test_duration_estimate() {
        assert_eq!(estimate_duration_ms(3, &PlannerConfig::default()), 630_000);
    }
}
