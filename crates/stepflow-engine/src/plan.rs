use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stepflow_core::config::ExecutionOptions;
use stepflow_core::error::Result;

use crate::status::{PlanStatus, StepStatus};

/// Tool parameters, passed verbatim to the tool as a JSON object.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// One tool invocation inside a plan.
///
/// Status, error and result are owned by the executor and only change
/// through the transition table in [`StepStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the plan.
    pub id: String,
    /// Key into the tool registry.
    pub tool_name: String,
    /// Human-readable; the engine never reads it.
    pub description: String,
    #[serde(default)]
    pub parameters: Parameters,
    /// Ids of steps in the same plan that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl Step {
    fn new(
        id: String,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        parameters: Parameters,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            description: description.into(),
            parameters,
            depends_on: vec![],
            status: StepStatus::Pending,
            error: None,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency on another step of the same plan.
    pub fn depends_on_step(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Failure message or skip reason.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Tool output of a completed step.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Wall time between dispatch and outcome.
    pub fn elapsed_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.completed_at?;
        Some((end - start).num_milliseconds().max(0) as u64)
    }

    /// Tool input: the parameters as a JSON object.
    pub fn input(&self) -> serde_json::Value {
        serde_json::Value::Object(self.parameters.clone())
    }

    fn transition(&mut self, next: StepStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    pub(crate) fn mark_running(&mut self) -> Result<()> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        Ok(())
    }

    pub(crate) fn mark_completed(&mut self, result: String) -> Result<()> {
        self.transition(StepStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_skipped(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Skipped)?;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Back to Pending for another attempt.
    pub(crate) fn requeue(&mut self) -> Result<()> {
        self.transition(StepStatus::Pending)?;
        self.error = None;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }
}

/// Per-status step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PlanSummary {
    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }

    /// Nothing left to schedule.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// A declarative, tool-invoking plan and its aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub description: String,
    /// Execution order tie-break only; dependencies are explicit.
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub options: ExecutionOptions,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approved_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    /// Create an empty Draft plan with default options.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            steps: vec![],
            options: ExecutionOptions::default(),
            metadata: HashMap::new(),
            status: PlanStatus::Draft,
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Replace the execution options.
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a Pending step and return it for dependency wiring.
    ///
    /// Only meaningful while the plan is being built; steps added after
    /// execution has started are picked up on the next `execute`/`resume`.
    pub fn add_step(
        &mut self,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Parameters>,
    ) -> &mut Step {
        let id = self.next_step_id();
        self.steps.push(Step::new(
            id,
            tool_name,
            description,
            parameters.unwrap_or_default(),
        ));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    fn next_step_id(&self) -> String {
        let mut n = self.steps.len() + 1;
        loop {
            let candidate = format!("step-{}", n);
            if self.step(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Record who approved the plan. Status is untouched; the gate is
    /// checked when execution starts.
    pub fn approve(&mut self, user: impl Into<String>) {
        self.approved_by = Some(user.into());
        self.approved_at = Some(Utc::now());
    }

    pub fn is_approved(&self) -> bool {
        self.approved_by.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Look up a step by position.
    pub fn get_step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            total: self.steps.len(),
            ..Default::default()
        };
        for step in &self.steps {
            match step.status {
                StepStatus::Pending => summary.pending += 1,
                StepStatus::Running => summary.running += 1,
                StepStatus::Completed => summary.completed += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    pub(crate) fn set_status(&mut self, next: PlanStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        match next {
            PlanStatus::Executing => {
                self.started_at = Some(Utc::now());
                self.completed_at = None;
            }
            PlanStatus::Completed | PlanStatus::Partial | PlanStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            PlanStatus::Draft => {}
        }
        Ok(())
    }
}
