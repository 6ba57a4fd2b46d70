use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use stepflow_core::error::{Result, StepflowError};
use stepflow_core::traits::Tool;
use stepflow_core::types::{ToolContext, ToolResult};

const MAX_OUTPUT_BYTES: usize = 30000;

pub struct BashTool;

#[derive(Deserialize)]
struct BashInput {
    command: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 { 120 }

/// Merge stdout and stderr into one tool payload.
fn render_output(stdout: &str, stderr: &str) -> String {
    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("STDERR:\n");
        content.push_str(stderr);
    }

    if content.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("\n... (output truncated)");
    }

    if content.is_empty() {
        content = "(no output)".to_string();
    }
    content
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the working directory. Returns stdout and stderr; a non-zero exit code fails the step."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120)",
                    "default": 120
                }
            },
            "required": ["command"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: BashInput = serde_json::from_value(input)
                .map_err(|e| StepflowError::ToolValidation(e.to_string()))?;

            debug!(command = %params.command, "Executing bash command");

            let timeout = std::time::Duration::from_secs(params.timeout);
            let result = tokio::time::timeout(timeout, async {
                tokio::process::Command::new("bash")
                    .arg("-c")
                    .arg(&params.command)
                    .current_dir(&ctx.working_dir)
                    .kill_on_drop(true)
                    .output()
                    .await
            })
            .await;

            match result {
                Ok(Ok(output)) => {
                    let content = render_output(
                        &String::from_utf8_lossy(&output.stdout),
                        &String::from_utf8_lossy(&output.stderr),
                    );
                    if output.status.success() {
                        Ok(ToolResult::success(content))
                    } else {
                        let code = output.status.code().unwrap_or(-1);
                        Ok(ToolResult::error(format!("Exit code {}\n{}", code, content)))
                    }
                }
                Ok(Err(e)) => Err(StepflowError::ToolExecution {
                    tool: "bash".to_string(),
                    message: e.to_string(),
                }),
                Err(_) => Err(StepflowError::ToolTimeout {
                    tool: "bash".to_string(),
                    timeout_ms: params.timeout * 1000,
                }),
            }
        })
    }
}
