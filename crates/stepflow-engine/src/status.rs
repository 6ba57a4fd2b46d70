use serde::{Deserialize, Serialize};

use stepflow_core::error::{Result, StepflowError};

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
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
    /// Legal successors of this status.
    pub fn successors(self) -> &'static [StepStatus] {
        use StepStatus::*;
        match self {
            Pending => &[Running, Skipped],
            Running => &[Completed, Failed, Skipped],
            // Resume re-queues both.
            Failed => &[Pending],
            Skipped => &[Pending],
            Completed => &[],
        }
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Validate a transition, returning `next` on success.
    pub fn transition(self, next: StepStatus) -> Result<StepStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StepflowError::InvalidTransition {
                entity: "step",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Failed or Skipped: blocks every dependent.
    pub fn is_blocking(self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            StepStatus::Pending => "⏳",
            StepStatus::Running => "🔄",
            StepStatus::Completed => "✅",
            StepStatus::Failed => "❌",
            StepStatus::Skipped => "⏭️",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate lifecycle of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Draft,
    Executing,
    Completed,
    Partial,
    Cancelled,
}

impl PlanStatus {
    /// Legal successors of this status.
    pub fn successors(self) -> &'static [PlanStatus] {
        use PlanStatus::*;
        match self {
            Draft => &[Executing, Cancelled],
            Executing => &[Completed, Partial, Cancelled],
            Partial => &[Executing, Cancelled],
            Cancelled => &[Executing],
            Completed => &[],
        }
    }

    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Validate a transition, returning `next` on success.
    pub fn transition(self, next: PlanStatus) -> Result<PlanStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StepflowError::InvalidTransition {
                entity: "plan",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Completed, Partial or Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Partial | PlanStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Partial => "partial",
            PlanStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_step_is_final() {
        for next in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Failed,
            StepStatus::Skipped,
        ] {
            assert!(!StepStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let err = StepStatus::Pending
            .transition(StepStatus::Completed)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid step transition: pending -> completed");
    }

    #[test]
    fn failed_and_skipped_requeue() {
        assert_eq!(
            StepStatus::Failed.transition(StepStatus::Pending).unwrap(),
            StepStatus::Pending
        );
        assert!(StepStatus::Skipped.can_transition_to(StepStatus::Pending));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Running));
    }

    #[test]
    fn plan_cannot_leave_completed() {
        assert!(PlanStatus::Completed.transition(PlanStatus::Executing).is_err());
        assert!(PlanStatus::Completed.transition(PlanStatus::Cancelled).is_err());
    }

    #[test]
    fn plan_happy_path() {
        let s = PlanStatus::Draft.transition(PlanStatus::Executing).unwrap();
        let s = s.transition(PlanStatus::Partial).unwrap();
        let s = s.transition(PlanStatus::Executing).unwrap();
        assert_eq!(s.transition(PlanStatus::Completed).unwrap(), PlanStatus::Completed);
    }

    #[test]
    fn draft_cannot_finish_without_executing() {
        assert!(!PlanStatus::Draft.can_transition_to(PlanStatus::Completed));
        assert!(!PlanStatus::Draft.can_transition_to(PlanStatus::Partial));
    }

    #[test]
    fn serde_lowercase() {
        assert_eq!(serde_json::to_string(&StepStatus::Skipped).unwrap(), "\"skipped\"");
        let s: PlanStatus = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(s, PlanStatus::Partial);
    }
}
