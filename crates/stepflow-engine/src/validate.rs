use std::collections::{HashMap, HashSet, VecDeque};

use stepflow_core::error::{Result, StepflowError};
use stepflow_tools::ToolRegistry;

use crate::plan::ExecutionPlan;

/// Reject plans whose dependency graph cannot be scheduled.
///
/// Checks duplicate ids, self-dependencies, unknown dependency ids and
/// cycles. Never mutates the plan.
pub fn check_dependencies(plan: &ExecutionPlan) -> Result<()> {
    let mut ids: HashSet<&str> = HashSet::with_capacity(plan.steps.len());
    for step in &plan.steps {
        if !ids.insert(step.id.as_str()) {
            return Err(StepflowError::InvalidPlan(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    for step in &plan.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(StepflowError::InvalidPlan(format!(
                    "step '{}' depends on itself",
                    step.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(StepflowError::InvalidPlan(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    if let Some(cycle) = find_cycle(plan) {
        return Err(StepflowError::InvalidPlan(format!(
            "dependency cycle involving: {}",
            cycle.join(", ")
        )));
    }
    Ok(())
}

/// Kahn's algorithm; returns the steps that never reach in-degree zero.
fn find_cycle(plan: &ExecutionPlan) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &plan.steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.depends_on {
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = plan
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        for next in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if visited == plan.steps.len() {
        return None;
    }
    Some(
        plan.steps
            .iter()
            .filter(|s| in_degree.get(s.id.as_str()).is_some_and(|d| *d > 0))
            .map(|s| s.id.clone())
            .collect(),
    )
}

/// Lint a plan against a tool registry.
///
/// Returns human-readable findings; an empty list means the plan looks
/// runnable. Unlike [`check_dependencies`] this also flags forward
/// references, which the scheduler tolerates but planners should not emit.
pub fn validate_plan(plan: &ExecutionPlan, tools: &ToolRegistry) -> Vec<String> {
    let mut findings = Vec::new();

    if plan.description.trim().is_empty() {
        findings.push("plan description is empty".to_string());
    }
    if plan.steps.is_empty() {
        findings.push("plan has no steps".to_string());
    }

    let positions: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    for (i, step) in plan.steps.iter().enumerate() {
        if !tools.contains(&step.tool_name) {
            findings.push(format!(
                "step {} ({}): unknown tool '{}'",
                i + 1,
                step.id,
                step.tool_name
            ));
        }
        if step.description.trim().is_empty() {
            findings.push(format!("step {} ({}): missing description", i + 1, step.id));
        }
        for dep in &step.depends_on {
            match positions.get(dep.as_str()) {
                None => findings.push(format!(
                    "step {} ({}): depends on unknown step '{}'",
                    i + 1,
                    step.id,
                    dep
                )),
                Some(&pos) if pos >= i => findings.push(format!(
                    "step {} ({}): depends on '{}' which does not precede it",
                    i + 1,
                    step.id,
                    dep
                )),
                Some(_) => {}
            }
        }
    }

    findings
}
