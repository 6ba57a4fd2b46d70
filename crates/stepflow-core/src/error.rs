use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepflowError {
    // Precondition errors
    #[error("plan is already executing")]
    AlreadyExecuting,

    #[error("plan is already completed")]
    AlreadyCompleted,

    #[error("plan was cancelled; use resume to run it again")]
    PlanCancelled,

    #[error("approval required before the plan can execute")]
    ApprovalRequired,

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_ms}ms: {tool}")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Cancellation
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    #[error("Execution deadline exceeded")]
    DeadlineExceeded,

    // Aggregate failure for continue-on-error runs
    #[error("{failed} step(s) failed, {skipped} skipped; first error: {first_error}")]
    StepsFailed {
        failed: usize,
        skipped: usize,
        first_error: String,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Planner response errors
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StepflowError {
    /// True for a per-step deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ToolTimeout { .. })
    }

    /// True when the master context was cancelled or ran out of time.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::DeadlineExceeded)
    }

    /// Precondition failures never mutate the plan.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExecuting
                | Self::AlreadyCompleted
                | Self::PlanCancelled
                | Self::ApprovalRequired
                | Self::InvalidPlan(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StepflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = StepflowError::ToolTimeout {
            tool: "slow".into(),
            timeout_ms: 50,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_cancellation());
        assert_eq!(timeout.to_string(), "Tool timeout after 50ms: slow");

        assert!(StepflowError::DeadlineExceeded.is_cancellation());
        assert!(StepflowError::Cancelled("user".into()).is_cancellation());
        assert!(StepflowError::ApprovalRequired.is_precondition());
        assert!(!StepflowError::ToolNotFound("x".into()).is_precondition());
    }

    #[test]
    fn test_tool_not_found_message() {
        let err = StepflowError::ToolNotFound("nonexistent_tool".into());
        assert!(err.to_string().contains("Tool not found"));
    }
}
