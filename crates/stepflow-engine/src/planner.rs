//! Planner response parsing.
//!
//! A planner answers with a JSON object listing steps in order, where
//! `depends_on` refers to earlier steps by zero-based index. The object may
//! be wrapped in prose or a code fence.

use serde::Deserialize;
use tracing::debug;

use stepflow_core::config::ExecutionOptions;
use stepflow_core::error::{Result, StepflowError};

use crate::plan::{ExecutionPlan, Parameters};

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<StepResponse>,
    #[serde(default)]
    options: Option<ExecutionOptions>,
}

#[derive(Debug, Deserialize)]
struct StepResponse {
    tool_name: String,
    #[serde(default)]
    description: String,
    /// Free-form input, folded into `parameters.input`.
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    depends_on: Vec<i64>,
}

/// Build a Draft plan from a planner response.
///
/// Dependency indices that do not point at an earlier step are dropped.
/// Options embedded in the response replace the defaults.
pub fn parse_plan_response(content: &str) -> Result<ExecutionPlan> {
    parse_plan_response_with(content, ExecutionOptions::default())
}

/// Like [`parse_plan_response`], with `defaults` used when the response
/// carries no options of its own.
pub fn parse_plan_response_with(
    content: &str,
    defaults: ExecutionOptions,
) -> Result<ExecutionPlan> {
    let response: PlanResponse = match serde_json::from_str(content) {
        Ok(response) => response,
        Err(direct) => {
            let json = extract_json(content).ok_or_else(|| {
                StepflowError::PlanParse(format!(
                    "no JSON object found in response (direct parse: {})",
                    direct
                ))
            })?;
            serde_json::from_str(json).map_err(|e| {
                StepflowError::PlanParse(format!("failed to parse extracted JSON: {}", e))
            })?
        }
    };

    let mut plan = ExecutionPlan::new(response.description)
        .with_options(response.options.unwrap_or(defaults));

    for (i, step) in response.steps.into_iter().enumerate() {
        let mut parameters = step.parameters;
        if let Some(input) = step.input.filter(|s| !s.is_empty()) {
            parameters
                .entry("input")
                .or_insert(serde_json::Value::String(input));
        }

        let deps: Vec<String> = step
            .depends_on
            .iter()
            .filter_map(|&idx| usize::try_from(idx).ok().filter(|&idx| idx < i))
            .filter_map(|idx| plan.get_step(idx).map(|s| s.id.clone()))
            .collect();
        if deps.len() != step.depends_on.len() {
            debug!(step = i, "Dropped dependencies that do not point backwards");
        }

        let added = plan.add_step(step.tool_name, step.description, Some(parameters));
        for dep in deps {
            added.depends_on_step(dep);
        }
    }

    Ok(plan)
}

/// Slice from the first `{` to the last `}`.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
