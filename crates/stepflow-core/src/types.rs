use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition, as shown to a planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
///
/// The executor clones it into every step and never looks inside.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub session_id: SessionId,
    pub working_dir: PathBuf,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: SessionId::new(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            metadata: HashMap::new(),
        }
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Plan lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum PlanEvent {
    /// A step was dispatched.
    StepStarted {
        plan_id: String,
        step_id: String,
        tool: String,
    },
    /// A step finished successfully.
    StepCompleted {
        plan_id: String,
        step_id: String,
        tool: String,
        elapsed_ms: u64,
    },
    /// A step failed (tool error, missing tool or timeout).
    StepFailed {
        plan_id: String,
        step_id: String,
        tool: String,
        error: String,
    },
    /// The plan reached a terminal status.
    PlanCompleted {
        plan_id: String,
        status: String,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl PlanEvent {
    pub fn plan_id(&self) -> &str {
        match self {
            Self::StepStarted { plan_id, .. }
            | Self::StepCompleted { plan_id, .. }
            | Self::StepFailed { plan_id, .. }
            | Self::PlanCompleted { plan_id, .. } => plan_id,
        }
    }
}
