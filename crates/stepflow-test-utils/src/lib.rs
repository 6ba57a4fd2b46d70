//! Mock tools shared by the stepflow test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use stepflow_core::error::{Result, StepflowError};
use stepflow_core::traits::Tool;
use stepflow_core::types::{ToolContext, ToolResult};
use stepflow_tools::ToolRegistry;

/// How a [`MockTool`] call ends.
#[derive(Debug, Clone)]
enum Outcome {
    Success(String),
    /// `Err(ToolExecution)` from `execute`.
    Error(String),
    /// `Ok(ToolResult { is_error: true })`.
    ErrorResult(String),
}

/// Configurable tool that records its calls.
///
/// Sleeps use `tokio::time`, so tests can run with a paused clock.
pub struct MockTool {
    name: String,
    outcome: Outcome,
    delay: Duration,
    fail_first: usize,
    calls: AtomicUsize,
    inputs: Mutex<Vec<serde_json::Value>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTool {
    /// Succeeds immediately with `"ok"`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Success("ok".to_string()),
            delay: Duration::ZERO,
            fail_first: 0,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_result(mut self, content: impl Into<String>) -> Self {
        self.outcome = Outcome::Success(content.into());
        self
    }

    /// Every call returns `Err(ToolExecution)` with this message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.outcome = Outcome::Error(message.into());
        self
    }

    /// Every call returns an error-flagged `ToolResult`.
    pub fn with_error_result(mut self, content: impl Into<String>) -> Self {
        self.outcome = Outcome::ErrorResult(content.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` calls fail, later calls use the configured outcome.
    pub fn failing_times(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Wrap in an `Arc` so the test keeps a handle after registration.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs of every call, in call order.
    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.inputs.lock().unwrap().clone()
    }

    /// Highest number of overlapping calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool for tests"
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if call < self.fail_first {
                return Err(StepflowError::ToolExecution {
                    tool: self.name.clone(),
                    message: format!("scripted failure {}", call + 1),
                });
            }

            match &self.outcome {
                Outcome::Success(content) => Ok(ToolResult::success(content.clone())),
                Outcome::ErrorResult(content) => Ok(ToolResult::error(content.clone())),
                Outcome::Error(message) => Err(StepflowError::ToolExecution {
                    tool: self.name.clone(),
                    message: message.clone(),
                }),
            }
        })
    }
}

/// Registry holding the given mocks.
pub fn registry_with(tools: &[Arc<MockTool>]) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool.clone());
    }
    Arc::new(registry)
}

/// Tool context rooted in the system temp directory.
pub fn test_context() -> ToolContext {
    ToolContext::new("test-agent").with_working_dir(std::env::temp_dir())
}
