use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepflowError};

/// Top-level stepflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Defaults applied to plans that don't carry their own options.
    #[serde(default)]
    pub executor: ExecutionOptions,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub hooks: Option<HooksConfig>,
}

/// Execution policy for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Refuse to execute until someone approves the plan.
    #[serde(default = "default_require_approval")]
    pub require_approval: bool,
    /// Halt all scheduling on the first failed step.
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    /// Dispatch independent steps concurrently.
    #[serde(default)]
    pub allow_parallel: bool,
    /// Upper bound on in-flight tool calls when `allow_parallel` is set.
    /// Zero is treated as one.
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,
    /// Per-step deadline in milliseconds (0 = none).
    #[serde(default)]
    pub step_timeout_ms: u64,
}

fn default_require_approval() -> bool { true }
fn default_stop_on_error() -> bool { true }
fn default_max_parallel_steps() -> usize { 4 }

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            require_approval: default_require_approval(),
            stop_on_error: default_stop_on_error(),
            allow_parallel: false,
            max_parallel_steps: default_max_parallel_steps(),
            step_timeout_ms: 0,
        }
    }
}

impl ExecutionOptions {
    /// Number of tool calls allowed in flight at once.
    ///
    /// Capped at [`Semaphore::MAX_PERMITS`](tokio::sync::Semaphore::MAX_PERMITS).
    pub fn concurrency(&self) -> usize {
        if self.allow_parallel {
            self.max_parallel_steps
                .clamp(1, tokio::sync::Semaphore::MAX_PERMITS)
        } else {
            1
        }
    }

    /// Per-step deadline, if any.
    pub fn step_timeout(&self) -> Option<std::time::Duration> {
        (self.step_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.step_timeout_ms))
    }
}

/// Settings for the tool context handed to every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Working directory for tools. Default: current directory.
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_agent_id() -> String { "stepflow".to_string() }

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            working_dir: None,
        }
    }
}

/// Shell commands run on plan lifecycle transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_step_start: Vec<String>,
    #[serde(default)]
    pub on_step_complete: Vec<String>,
    #[serde(default)]
    pub on_step_failed: Vec<String>,
    #[serde(default)]
    pub on_plan_complete: Vec<String>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.on_step_start.is_empty()
            && self.on_step_complete.is_empty()
            && self.on_step_failed.is_empty()
            && self.on_plan_complete.is_empty()
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StepflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| StepflowError::Config(e.to_string()))
    }

    /// Resolve the tool working directory (expand ~).
    pub fn working_dir(&self) -> Option<PathBuf> {
        let dir = self.tools.working_dir.as_deref()?;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(dir))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
