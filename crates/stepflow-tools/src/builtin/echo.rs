use futures::future::BoxFuture;
use serde::Deserialize;

use stepflow_core::error::{Result, StepflowError};
use stepflow_core::traits::Tool;
use stepflow_core::types::{ToolContext, ToolResult};

pub struct EchoTool;

#[derive(Deserialize)]
struct EchoInput {
    message: String,
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given message unchanged."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to return"
                }
            },
            "required": ["message"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: EchoInput = serde_json::from_value(input)
                .map_err(|e| StepflowError::ToolValidation(e.to_string()))?;
            Ok(ToolResult::success(params.message))
        })
    }
}
