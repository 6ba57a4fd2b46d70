use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ToolContext, ToolResult};

/// A named capability a plan step can invoke.
///
/// The executor cancels a call (master cancellation or step timeout) by
/// dropping the returned future, so implementations should not rely on
/// running to completion. Child processes should be spawned with
/// `kill_on_drop(true)`.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (the key plan steps refer to).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;
}
