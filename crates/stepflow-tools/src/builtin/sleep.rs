use futures::future::BoxFuture;
use serde::Deserialize;

use stepflow_core::error::{Result, StepflowError};
use stepflow_core::traits::Tool;
use stepflow_core::types::{ToolContext, ToolResult};

/// Longest accepted wait.
const MAX_SLEEP_MS: u64 = 10 * 60 * 1000;

pub struct SleepTool;

#[derive(Deserialize)]
struct SleepInput {
    ms: u64,
}

impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for the given number of milliseconds."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ms": {
                    "type": "integer",
                    "description": "Milliseconds to wait"
                }
            },
            "required": ["ms"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: SleepInput = serde_json::from_value(input)
                .map_err(|e| StepflowError::ToolValidation(e.to_string()))?;
            if params.ms > MAX_SLEEP_MS {
                return Err(StepflowError::ToolValidation(format!(
                    "ms must be at most {}",
                    MAX_SLEEP_MS
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(params.ms)).await;
            Ok(ToolResult::success(format!("slept {}ms", params.ms)))
        })
    }
}
