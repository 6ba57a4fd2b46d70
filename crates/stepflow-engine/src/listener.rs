use std::sync::Arc;

use tracing::debug;

use stepflow_core::config::HooksConfig;
use stepflow_core::error::StepflowError;
use stepflow_core::event::EventBus;
use stepflow_core::hooks::run_hooks;
use stepflow_core::types::PlanEvent;

use crate::plan::{ExecutionPlan, Step};

/// Observer of plan execution.
///
/// Every method is called synchronously on the task that owns the plan,
/// so a slow listener stalls scheduling. Panics are not caught. Listeners
/// that need to do real work should hand it off (see [`ShellHookListener`]).
pub trait PlanListener: Send + Sync {
    /// A step was dispatched.
    fn on_step_start(&self, _plan: &ExecutionPlan, _step: &Step) {}

    /// A step completed; its result is on the step.
    fn on_step_complete(&self, _plan: &ExecutionPlan, _step: &Step) {}

    /// A step failed, including missing tools and timeouts.
    fn on_step_failed(&self, _plan: &ExecutionPlan, _step: &Step, _error: &StepflowError) {}

    /// The plan reached a terminal status other than a master-context cancellation.
    fn on_plan_complete(&self, _plan: &ExecutionPlan) {}
}

type StepFn = Box<dyn Fn(&ExecutionPlan, &Step) + Send + Sync>;
type FailedFn = Box<dyn Fn(&ExecutionPlan, &Step, &StepflowError) + Send + Sync>;
type PlanFn = Box<dyn Fn(&ExecutionPlan) + Send + Sync>;

/// Closure slots set through the executor's builder methods.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) step_start: Option<StepFn>,
    pub(crate) step_complete: Option<StepFn>,
    pub(crate) step_failed: Option<FailedFn>,
    pub(crate) plan_complete: Option<PlanFn>,
}

impl PlanListener for Callbacks {
    fn on_step_start(&self, plan: &ExecutionPlan, step: &Step) {
        if let Some(f) = &self.step_start {
            f(plan, step);
        }
    }

    fn on_step_complete(&self, plan: &ExecutionPlan, step: &Step) {
        if let Some(f) = &self.step_complete {
            f(plan, step);
        }
    }

    fn on_step_failed(&self, plan: &ExecutionPlan, step: &Step, error: &StepflowError) {
        if let Some(f) = &self.step_failed {
            f(plan, step, error);
        }
    }

    fn on_plan_complete(&self, plan: &ExecutionPlan) {
        if let Some(f) = &self.plan_complete {
            f(plan);
        }
    }
}

/// Publishes [`PlanEvent`]s on an [`EventBus`].
pub struct EventBusListener {
    bus: Arc<EventBus>,
}

impl EventBusListener {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl PlanListener for EventBusListener {
    fn on_step_start(&self, plan: &ExecutionPlan, step: &Step) {
        self.bus.publish(PlanEvent::StepStarted {
            plan_id: plan.id.clone(),
            step_id: step.id.clone(),
            tool: step.tool_name.clone(),
        });
    }

    fn on_step_complete(&self, plan: &ExecutionPlan, step: &Step) {
        self.bus.publish(PlanEvent::StepCompleted {
            plan_id: plan.id.clone(),
            step_id: step.id.clone(),
            tool: step.tool_name.clone(),
            elapsed_ms: step.elapsed_ms().unwrap_or(0),
        });
    }

    fn on_step_failed(&self, plan: &ExecutionPlan, step: &Step, error: &StepflowError) {
        self.bus.publish(PlanEvent::StepFailed {
            plan_id: plan.id.clone(),
            step_id: step.id.clone(),
            tool: step.tool_name.clone(),
            error: error.to_string(),
        });
    }

    fn on_plan_complete(&self, plan: &ExecutionPlan) {
        let summary = plan.summary();
        self.bus.publish(PlanEvent::PlanCompleted {
            plan_id: plan.id.clone(),
            status: plan.status().to_string(),
            completed: summary.completed,
            failed: summary.failed,
            skipped: summary.skipped,
        });
    }
}

/// Runs the `[hooks]` shell commands in the background.
///
/// Exposes `STEPFLOW_PLAN_ID`, `STEPFLOW_STEP_ID`, `STEPFLOW_TOOL`,
/// `STEPFLOW_ERROR` and `STEPFLOW_STATUS` to the commands. Requires a tokio
/// runtime.
pub struct ShellHookListener {
    hooks: HooksConfig,
}

impl ShellHookListener {
    pub fn new(hooks: HooksConfig) -> Self {
        Self { hooks }
    }

    fn spawn(&self, commands: &[String], env: Vec<(&'static str, String)>) {
        if commands.is_empty() {
            return;
        }
        let commands = commands.to_vec();
        debug!(count = commands.len(), "Spawning lifecycle hooks");
        tokio::spawn(async move {
            let vars: Vec<(&str, &str)> = env.iter().map(|(k, v)| (*k, v.as_str())).collect();
            run_hooks(&commands, &vars).await;
        });
    }
}

fn step_env(plan: &ExecutionPlan, step: &Step) -> Vec<(&'static str, String)> {
    vec![
        ("STEPFLOW_PLAN_ID", plan.id.clone()),
        ("STEPFLOW_STEP_ID", step.id.clone()),
        ("STEPFLOW_TOOL", step.tool_name.clone()),
        ("STEPFLOW_STATUS", step.status().to_string()),
    ]
}

impl PlanListener for ShellHookListener {
    fn on_step_start(&self, plan: &ExecutionPlan, step: &Step) {
        self.spawn(&self.hooks.on_step_start, step_env(plan, step));
    }

    fn on_step_complete(&self, plan: &ExecutionPlan, step: &Step) {
        self.spawn(&self.hooks.on_step_complete, step_env(plan, step));
    }

    fn on_step_failed(&self, plan: &ExecutionPlan, step: &Step, error: &StepflowError) {
        let mut env = step_env(plan, step);
        env.push(("STEPFLOW_ERROR", error.to_string()));
        self.spawn(&self.hooks.on_step_failed, env);
    }

    fn on_plan_complete(&self, plan: &ExecutionPlan) {
        self.spawn(
            &self.hooks.on_plan_complete,
            vec![
                ("STEPFLOW_PLAN_ID", plan.id.clone()),
                ("STEPFLOW_STATUS", plan.status().to_string()),
            ],
        );
    }
}
