use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stepflow_core::error::{Result, StepflowError};
use stepflow_core::traits::Tool;
use stepflow_core::types::ToolContext;
use stepflow_tools::ToolRegistry;

use crate::context::RunContext;
use crate::listener::{Callbacks, PlanListener};
use crate::plan::{ExecutionPlan, Step};
use crate::resolver::{requeue_for_resume, resolve};
use crate::status::{PlanStatus, StepStatus};
use crate::validate::check_dependencies;

/// Outcome reported by a worker task: step index and tool output.
type StepOutcome = (usize, Result<String>);

/// In-flight registration of a plan being driven by `execute`/`resume`.
struct ActiveRun {
    token: CancellationToken,
    reason: Option<String>,
}

/// Drives execution plans against a tool registry.
///
/// One executor can run many plans, including concurrently; each call owns
/// its plan exclusively for the duration of the call.
pub struct Executor {
    tools: Arc<ToolRegistry>,
    callbacks: Callbacks,
    listeners: Vec<Arc<dyn PlanListener>>,
    active: Mutex<HashMap<String, ActiveRun>>,
}

/// Removes the in-flight registration when the owning call returns.
struct Registration<'a> {
    executor: &'a Executor,
    plan_id: String,
    token: CancellationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.executor.active_runs().remove(&self.plan_id);
    }
}

/// Mutable state of one scheduling loop.
struct RunState {
    semaphore: Arc<Semaphore>,
    step_timeout: Option<Duration>,
    tasks: JoinSet<StepOutcome>,
    /// First failure under stop-on-error; halts dispatch.
    trigger: Option<StepflowError>,
    first_error: Option<String>,
}

/// Why the scheduling loop stopped early.
enum Interrupt {
    Context(StepflowError),
    Cancelled(String),
    /// The loop itself failed (worker join error, bad transition).
    Fault(StepflowError),
}

impl Executor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            callbacks: Callbacks::default(),
            listeners: Vec::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn on_step_start(
        mut self,
        f: impl Fn(&ExecutionPlan, &Step) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.step_start = Some(Box::new(f));
        self
    }

    pub fn on_step_complete(
        mut self,
        f: impl Fn(&ExecutionPlan, &Step) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.step_complete = Some(Box::new(f));
        self
    }

    pub fn on_step_failed(
        mut self,
        f: impl Fn(&ExecutionPlan, &Step, &StepflowError) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.step_failed = Some(Box::new(f));
        self
    }

    pub fn on_plan_complete(mut self, f: impl Fn(&ExecutionPlan) + Send + Sync + 'static) -> Self {
        self.callbacks.plan_complete = Some(Box::new(f));
        self
    }

    /// Add an observer. Listeners run after the closure callbacks, in
    /// registration order.
    pub fn with_listener(mut self, listener: Arc<dyn PlanListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run a plan to a terminal status.
    ///
    /// Precondition failures leave the plan untouched. Step-level state is
    /// authoritative; the returned error summarizes why the plan did not
    /// fully complete.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        plan: &mut ExecutionPlan,
        tool_ctx: &ToolContext,
    ) -> Result<()> {
        match plan.status() {
            PlanStatus::Executing => return Err(StepflowError::AlreadyExecuting),
            PlanStatus::Completed => return Err(StepflowError::AlreadyCompleted),
            PlanStatus::Cancelled => return Err(StepflowError::PlanCancelled),
            PlanStatus::Draft | PlanStatus::Partial => {}
        }
        check_gate(plan)?;
        self.drive(ctx, plan, tool_ctx).await
    }

    /// Re-run every step that did not complete.
    ///
    /// Failed and Skipped steps go back to Pending; Completed steps are
    /// never invoked again. Resuming a Completed plan is a no-op.
    pub async fn resume(
        &self,
        ctx: &RunContext,
        plan: &mut ExecutionPlan,
        tool_ctx: &ToolContext,
    ) -> Result<()> {
        match plan.status() {
            PlanStatus::Completed => return Ok(()),
            PlanStatus::Executing => return Err(StepflowError::AlreadyExecuting),
            PlanStatus::Draft | PlanStatus::Partial | PlanStatus::Cancelled => {}
        }
        check_gate(plan)?;

        let requeued = requeue_for_resume(&mut plan.steps)?;
        info!(plan_id = %plan.id, requeued = requeued.len(), "Resuming plan");
        self.drive(ctx, plan, tool_ctx).await
    }

    /// Mark a plan cancelled without running anything.
    ///
    /// Pending and Running steps become Skipped with `reason`; Completed and
    /// Failed steps keep their state. A Completed plan is left as is. If a
    /// call is currently driving a plan with the same id it is signalled
    /// as well.
    pub fn cancel(&self, plan: &mut ExecutionPlan, reason: impl Into<String>) {
        let reason = reason.into();
        self.cancel_running(&plan.id, reason.clone());
        if plan.status() == PlanStatus::Completed {
            return;
        }
        apply_cancel(plan, &reason);
        info!(plan_id = %plan.id, reason = %reason, "Plan cancelled");
    }

    /// Ask the call currently driving `plan_id` to stop.
    ///
    /// The owning call aborts its in-flight tools, applies the
    /// [`cancel`](Self::cancel) treatment and returns `Cancelled`. Returns
    /// false when no call is driving that plan.
    pub fn cancel_running(&self, plan_id: &str, reason: impl Into<String>) -> bool {
        let mut active = self.active_runs();
        match active.get_mut(plan_id) {
            Some(run) => {
                run.reason.get_or_insert_with(|| reason.into());
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a call is currently driving `plan_id`.
    pub fn is_running(&self, plan_id: &str) -> bool {
        self.active_runs().contains_key(plan_id)
    }

    fn active_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `plan_id` for this call. A second call driving a clone of the
    /// same plan is refused so `cancel_running` always reaches the owner.
    fn register(&self, plan_id: &str) -> Result<Registration<'_>> {
        let mut active = self.active_runs();
        if active.contains_key(plan_id) {
            return Err(StepflowError::AlreadyExecuting);
        }
        let token = CancellationToken::new();
        active.insert(
            plan_id.to_string(),
            ActiveRun {
                token: token.clone(),
                reason: None,
            },
        );
        Ok(Registration {
            executor: self,
            plan_id: plan_id.to_string(),
            token,
        })
    }

    fn cancel_reason(&self, plan_id: &str) -> String {
        self.active_runs()
            .get(plan_id)
            .and_then(|run| run.reason.clone())
            .unwrap_or_else(|| "cancelled".to_string())
    }

    fn notify(&self, f: impl Fn(&dyn PlanListener)) {
        f(&self.callbacks);
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    fn emit_start(&self, plan: &ExecutionPlan, index: usize) {
        let step = &plan.steps[index];
        self.notify(|l| l.on_step_start(plan, step));
    }

    fn emit_complete(&self, plan: &ExecutionPlan, index: usize) {
        let step = &plan.steps[index];
        self.notify(|l| l.on_step_complete(plan, step));
    }

    fn emit_failed(&self, plan: &ExecutionPlan, index: usize, err: &StepflowError) {
        let step = &plan.steps[index];
        self.notify(|l| l.on_step_failed(plan, step, err));
    }

    fn emit_plan_complete(&self, plan: &ExecutionPlan) {
        self.notify(|l| l.on_plan_complete(plan));
    }

    /// The scheduling loop shared by `execute` and `resume`.
    async fn drive(
        &self,
        ctx: &RunContext,
        plan: &mut ExecutionPlan,
        tool_ctx: &ToolContext,
    ) -> Result<()> {
        let registration = self.register(&plan.id)?;
        plan.set_status(PlanStatus::Executing)?;

        let concurrency = plan.options.concurrency();
        info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            concurrency,
            stop_on_error = plan.options.stop_on_error,
            "Executing plan"
        );

        let mut state = RunState {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            step_timeout: plan.options.step_timeout(),
            tasks: JoinSet::new(),
            trigger: None,
            first_error: None,
        };

        let interrupt = loop {
            if let Some(err) = ctx.err() {
                break Some(Interrupt::Context(err));
            }
            if registration.token.is_cancelled() {
                break Some(Interrupt::Cancelled(self.cancel_reason(&plan.id)));
            }

            if state.trigger.is_none() {
                match self.schedule(ctx, plan, tool_ctx, &mut state) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => break Some(Interrupt::Fault(err)),
                }
            }

            if state.tasks.is_empty() {
                break None;
            }

            let fault = tokio::select! {
                biased;
                _ = ctx.done() => None,
                _ = registration.token.cancelled() => None,
                joined = state.tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => self.record(plan, index, outcome, &mut state).err(),
                    Some(Err(e)) => Some(StepflowError::ToolExecution {
                        tool: "executor".to_string(),
                        message: format!("worker task failed: {}", e),
                    }),
                    None => None,
                },
            };
            if let Some(err) = fault {
                break Some(Interrupt::Fault(err));
            }
        };

        match interrupt {
            Some(Interrupt::Context(err)) => {
                state.tasks.shutdown().await;
                settle_interrupted(plan, &err);
                warn!(plan_id = %plan.id, error = %err, "Plan interrupted");
                Err(err)
            }
            Some(Interrupt::Fault(err)) => {
                state.tasks.shutdown().await;
                settle_interrupted(plan, &err);
                error!(plan_id = %plan.id, error = %err, "Plan aborted");
                self.emit_plan_complete(plan);
                Err(err)
            }
            Some(Interrupt::Cancelled(reason)) => {
                state.tasks.shutdown().await;
                apply_cancel(plan, &reason);
                info!(plan_id = %plan.id, reason = %reason, "Plan cancelled while running");
                self.emit_plan_complete(plan);
                Err(StepflowError::Cancelled(reason))
            }
            None => self.finish(plan, state),
        }
    }

    /// Apply cascade skips and dispatch runnable steps while permits last.
    ///
    /// A step's tool is looked up only once it holds a permit, so a missing
    /// tool fails at the step's real dispatch turn.
    ///
    /// Returns true when plan state changed without spawning work (skips or
    /// missing tools), so the caller re-resolves before waiting.
    fn schedule(
        &self,
        ctx: &RunContext,
        plan: &mut ExecutionPlan,
        tool_ctx: &ToolContext,
        state: &mut RunState,
    ) -> Result<bool> {
        let resolution = resolve(&plan.steps);
        let mut changed = !resolution.skipped.is_empty();

        for (id, reason) in &resolution.skipped {
            if let Some(step) = plan.step_mut(id) {
                debug!(step_id = %id, reason = %reason, "Skipping step");
                step.mark_skipped(reason.clone())?;
            }
        }

        for id in &resolution.runnable {
            if state.trigger.is_some() {
                break;
            }
            let Some(index) = plan.index_of(id) else {
                continue;
            };

            let Ok(permit) = state.semaphore.clone().try_acquire_owned() else {
                break;
            };

            let tool_name = plan.steps[index].tool_name.clone();
            let Some(tool) = self.tools.get(&tool_name) else {
                drop(permit);
                plan.steps[index].mark_running()?;
                self.emit_start(plan, index);
                self.fail(plan, index, StepflowError::ToolNotFound(tool_name), state)?;
                changed = true;
                continue;
            };

            plan.steps[index].mark_running()?;
            debug!(plan_id = %plan.id, step_id = %id, tool = %tool_name, "Dispatching step");
            self.emit_start(plan, index);

            let input = plan.steps[index].input();
            let call_ctx = tool_ctx.clone();
            let token = ctx.child_token();
            let timeout = state.step_timeout;
            state.tasks.spawn(async move {
                let _permit = permit;
                let outcome = invoke(tool, input, call_ctx, token, timeout).await;
                (index, outcome)
            });
        }

        Ok(changed)
    }

    /// Apply a worker's outcome to its step.
    fn record(
        &self,
        plan: &mut ExecutionPlan,
        index: usize,
        outcome: Result<String>,
        state: &mut RunState,
    ) -> Result<()> {
        if let Some(err) = state.trigger.as_ref() {
            // Halted by an earlier failure: late results are discarded.
            debug!(step_id = %plan.steps[index].id, "Discarding result of halted step");
            return plan.steps[index].mark_skipped(err.to_string());
        }

        match outcome {
            Ok(content) => {
                plan.steps[index].mark_completed(content)?;
                let step = &plan.steps[index];
                info!(
                    plan_id = %plan.id,
                    step_id = %step.id,
                    tool = %step.tool_name,
                    elapsed_ms = step.elapsed_ms().unwrap_or(0),
                    "Step completed"
                );
                self.emit_complete(plan, index);
                Ok(())
            }
            Err(err) => self.fail(plan, index, err, state),
        }
    }

    fn fail(
        &self,
        plan: &mut ExecutionPlan,
        index: usize,
        err: StepflowError,
        state: &mut RunState,
    ) -> Result<()> {
        let message = err.to_string();
        plan.steps[index].mark_failed(message.clone())?;
        warn!(
            plan_id = %plan.id,
            step_id = %plan.steps[index].id,
            tool = %plan.steps[index].tool_name,
            error = %message,
            "Step failed"
        );
        self.emit_failed(plan, index, &err);
        state.first_error.get_or_insert_with(|| message.clone());

        if plan.options.stop_on_error {
            for step in plan.steps.iter_mut() {
                if step.status() == StepStatus::Pending {
                    step.mark_skipped(message.clone())?;
                }
            }
            state.trigger = Some(err);
        }
        Ok(())
    }

    fn finish(&self, plan: &mut ExecutionPlan, state: RunState) -> Result<()> {
        let summary = plan.summary();
        let status = if summary.all_completed() {
            PlanStatus::Completed
        } else {
            PlanStatus::Partial
        };
        plan.set_status(status)?;
        info!(
            plan_id = %plan.id,
            status = %status,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Plan finished"
        );
        self.emit_plan_complete(plan);

        if let Some(err) = state.trigger {
            return Err(err);
        }
        if summary.failed > 0 {
            return Err(StepflowError::StepsFailed {
                failed: summary.failed,
                skipped: summary.skipped,
                first_error: state.first_error.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Approval gate and dependency validation. Never mutates the plan.
fn check_gate(plan: &ExecutionPlan) -> Result<()> {
    if plan.options.require_approval && !plan.is_approved() {
        return Err(StepflowError::ApprovalRequired);
    }
    check_dependencies(plan)
}

/// Running and Pending steps become Skipped; the plan becomes Cancelled.
fn apply_cancel(plan: &mut ExecutionPlan, reason: &str) {
    for step in plan.steps.iter_mut() {
        if matches!(step.status(), StepStatus::Pending | StepStatus::Running) {
            if let Err(e) = step.mark_skipped(reason) {
                warn!(step_id = %step.id, error = %e, "Could not skip step on cancel");
            }
        }
    }
    if plan.status() != PlanStatus::Cancelled {
        if let Err(e) = plan.set_status(PlanStatus::Cancelled) {
            warn!(plan_id = %plan.id, error = %e, "Could not cancel plan");
        }
    }
}

/// In-flight steps fail with `err`; the plan settles as Partial so it can
/// be resumed.
fn settle_interrupted(plan: &mut ExecutionPlan, err: &StepflowError) {
    let message = err.to_string();
    for step in plan.steps.iter_mut() {
        if step.status() == StepStatus::Running {
            if let Err(e) = step.mark_failed(message.clone()) {
                warn!(step_id = %step.id, error = %e, "Could not fail interrupted step");
            }
        }
    }
    if plan.status() == PlanStatus::Executing {
        if let Err(e) = plan.set_status(PlanStatus::Partial) {
            warn!(plan_id = %plan.id, error = %e, "Could not settle plan");
        }
    }
}

/// One tool call, bounded by the step timeout and the step's token.
async fn invoke(
    tool: Arc<dyn Tool>,
    input: serde_json::Value,
    ctx: ToolContext,
    token: CancellationToken,
    timeout: Option<Duration>,
) -> Result<String> {
    let name = tool.name().to_string();
    let panicked = |name: String| StepflowError::ToolExecution {
        tool: name,
        message: "tool panicked".to_string(),
    };

    // A tool can panic while building its future as well as while polling it.
    let built = std::panic::catch_unwind(AssertUnwindSafe(|| tool.execute(input, ctx)));
    let Ok(future) = built else {
        return Err(panicked(name));
    };
    let call = AssertUnwindSafe(future).catch_unwind();

    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                StepflowError::ToolTimeout {
                    tool: name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }
            }),
            None => Ok(call.await),
        }
    };

    let joined = tokio::select! {
        _ = token.cancelled() => return Err(StepflowError::Cancelled("step cancelled".to_string())),
        joined = bounded => joined?,
    };

    match joined {
        Err(_) => Err(panicked(name)),
        Ok(Err(e)) => Err(e),
        Ok(Ok(result)) if result.is_error => Err(StepflowError::ToolExecution {
            tool: name,
            message: result.content,
        }),
        Ok(Ok(result)) => Ok(result.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Parameters;
    use stepflow_core::config::ExecutionOptions;
    use stepflow_test_utils::{registry_with, test_context, MockTool};

    /// Records listener calls as `kind:step_id` strings.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl PlanListener for Recorder {
        fn on_step_start(&self, _plan: &ExecutionPlan, step: &Step) {
            self.push(format!("start:{}", step.id));
        }

        fn on_step_complete(&self, _plan: &ExecutionPlan, step: &Step) {
            self.push(format!("complete:{}", step.id));
        }

        fn on_step_failed(&self, _plan: &ExecutionPlan, step: &Step, _error: &StepflowError) {
            self.push(format!("failed:{}", step.id));
        }

        fn on_plan_complete(&self, plan: &ExecutionPlan) {
            self.push(format!("plan:{}", plan.status()));
        }
    }

    fn options() -> ExecutionOptions {
        ExecutionOptions {
            require_approval: false,
            ..Default::default()
        }
    }

    fn plan_with(options: ExecutionOptions) -> ExecutionPlan {
        ExecutionPlan::new("Test plan").with_options(options)
    }

    fn executor(tools: &[Arc<MockTool>]) -> (Executor, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(registry_with(tools)).with_listener(recorder.clone());
        (executor, recorder)
    }

    #[tokio::test]
    async fn sequential_execution() {
        let tool1 = MockTool::new("tool1").with_result("result1").shared();
        let tool2 = MockTool::new("tool2").with_result("result2").shared();
        let (executor, recorder) = executor(&[tool1.clone(), tool2.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        plan.add_step("tool2", "Step 2", None);

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(tool1.calls(), 1);
        assert_eq!(tool2.calls(), 1);
        assert_eq!(plan.steps[0].result(), Some("result1"));
        assert_eq!(plan.steps[1].result(), Some("result2"));
        assert!(plan.started_at().is_some());
        assert!(plan.completed_at().is_some());
        assert_eq!(
            recorder.events(),
            vec![
                "start:step-1",
                "complete:step-1",
                "start:step-2",
                "complete:step-2",
                "plan:completed",
            ]
        );
    }

    #[tokio::test]
    async fn empty_plan_completes() {
        let (executor, recorder) = executor(&[]);
        let mut plan = plan_with(options());
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(recorder.events(), vec!["plan:completed"]);
    }

    #[tokio::test]
    async fn stop_on_error_skips_rest() {
        let tool1 = MockTool::new("tool1").with_error("tool error").shared();
        let tool2 = MockTool::new("tool2").shared();
        let (executor, recorder) = executor(&[tool1.clone(), tool2.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        plan.add_step("tool2", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::ToolExecution { .. }));
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
        assert_eq!(plan.steps[1].status(), StepStatus::Skipped);
        assert_eq!(plan.steps[1].error(), plan.steps[0].error());
        assert_eq!(tool2.calls(), 0);
        assert_eq!(recorder.count("plan:"), 1);
    }

    #[tokio::test]
    async fn continue_on_error_runs_independent_steps() {
        let tool1 = MockTool::new("tool1").with_error("tool error").shared();
        let tool2 = MockTool::new("tool2").shared();
        let (executor, recorder) = executor(&[tool1, tool2.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            stop_on_error: false,
            ..options()
        });
        plan.add_step("tool1", "Step 1", None);
        plan.add_step("tool2", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        match err {
            StepflowError::StepsFailed {
                failed,
                skipped,
                first_error,
            } => {
                assert_eq!(failed, 1);
                assert_eq!(skipped, 0);
                assert!(first_error.contains("tool error"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[1].status(), StepStatus::Completed);
        assert_eq!(tool2.calls(), 1);
        assert_eq!(recorder.count("plan:partial"), 1);
    }

    #[tokio::test]
    async fn error_result_counts_as_failure() {
        let tool = MockTool::new("soft").with_error_result("exit code 1").shared();
        let (executor, _) = executor(&[tool]);

        let mut plan = plan_with(options());
        plan.add_step("soft", "Step 1", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_execution_overlaps() {
        let delay = Duration::from_millis(100);
        let tools: Vec<_> = (1..=3)
            .map(|i| MockTool::new(format!("tool{i}")).with_delay(delay).shared())
            .collect();
        let (executor, _) = executor(&tools);

        let mut plan = plan_with(ExecutionOptions {
            allow_parallel: true,
            max_parallel_steps: 3,
            ..options()
        });
        for i in 1..=3 {
            plan.add_step(format!("tool{i}"), format!("Step {i}"), None);
        }

        let start = tokio::time::Instant::now();
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn parallelism_is_bounded() {
        let tool = MockTool::new("work")
            .with_delay(Duration::from_millis(50))
            .shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            allow_parallel: true,
            max_parallel_steps: 2,
            ..options()
        });
        for i in 1..=5 {
            plan.add_step("work", format!("Step {i}"), None);
        }

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(tool.calls(), 5);
        assert_eq!(tool.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_mode_never_overlaps() {
        let tool = MockTool::new("work")
            .with_delay(Duration::from_millis(10))
            .shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            max_parallel_steps: 8,
            ..options()
        });
        for i in 1..=3 {
            plan.add_step("work", format!("Step {i}"), None);
        }

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();
        assert_eq!(tool.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn dependencies_override_declaration_order() {
        let tool = MockTool::new("t").shared();
        let (executor, recorder) = executor(&[tool]);

        let mut plan = plan_with(options());
        plan.add_step("t", "C", None).depends_on_step("step-2");
        plan.add_step("t", "B", None).depends_on_step("step-3");
        plan.add_step("t", "A", None);

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        let starts: Vec<String> = recorder
            .events()
            .into_iter()
            .filter(|e| e.starts_with("start:"))
            .collect();
        assert_eq!(starts, vec!["start:step-3", "start:step-2", "start:step-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_steps_wait_for_shared_dependency() {
        let fast = MockTool::new("fast").shared();
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_millis(50))
            .shared();
        let (executor, recorder) = executor(&[fast, slow]);

        let mut plan = plan_with(ExecutionOptions {
            allow_parallel: true,
            ..options()
        });
        plan.add_step("slow", "Root", None);
        plan.add_step("fast", "Left", None).depends_on_step("step-1");
        plan.add_step("fast", "Right", None).depends_on_step("step-1");

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        let events = recorder.events();
        let root_done = events.iter().position(|e| e == "complete:step-1").unwrap();
        let left = events.iter().position(|e| e == "start:step-2").unwrap();
        let right = events.iter().position(|e| e == "start:step-3").unwrap();
        assert!(root_done < left && root_done < right);
    }

    #[tokio::test]
    async fn failed_dependency_cascades() {
        let bad = MockTool::new("bad").with_error("boom").shared();
        let good = MockTool::new("good").shared();
        let (executor, _) = executor(&[bad, good.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            stop_on_error: false,
            ..options()
        });
        plan.add_step("bad", "A", None);
        plan.add_step("good", "B", None).depends_on_step("step-1");
        plan.add_step("good", "C", None).depends_on_step("step-2");
        plan.add_step("good", "D", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepflowError::StepsFailed { failed: 1, skipped: 2, .. }
        ));
        assert_eq!(plan.steps[1].error(), Some("dependency step-1 failed"));
        assert_eq!(plan.steps[2].error(), Some("dependency step-2 was skipped"));
        assert_eq!(plan.steps[3].status(), StepStatus::Completed);
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn approval_required() {
        let tool = MockTool::new("tool1").shared();
        let (executor, recorder) = executor(&[tool.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            require_approval: true,
            ..Default::default()
        });
        plan.add_step("tool1", "Step 1", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::ApprovalRequired));
        assert_eq!(plan.status(), PlanStatus::Draft);
        assert_eq!(tool.calls(), 0);
        assert!(recorder.events().is_empty());

        plan.approve("test-user");
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_dependency_rejected_without_mutation() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None).depends_on_step("nonexistent");

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::InvalidPlan(_)));
        assert_eq!(plan.status(), PlanStatus::Draft);
        assert_eq!(plan.steps[0].status(), StepStatus::Pending);
        assert_eq!(tool.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn context_deadline_interrupts() {
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_secs(5))
            .shared();
        let (executor, recorder) = executor(&[slow]);

        let mut plan = plan_with(options());
        plan.add_step("slow", "Step 1", None);
        plan.add_step("slow", "Step 2", None);

        let ctx = RunContext::new().with_timeout(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let err = executor
            .execute(&ctx, &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
        assert_eq!(plan.steps[1].status(), StepStatus::Pending);
        assert_eq!(recorder.count("plan:"), 0);
        assert!(!executor.is_running(&plan.id));
    }

    #[tokio::test]
    async fn cancelled_context_before_start() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);

        let ctx = RunContext::new();
        ctx.cancel();
        let err = executor
            .execute(&ctx, &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::Cancelled(_)));
        assert_eq!(tool.calls(), 0);
        assert_eq!(plan.status(), PlanStatus::Partial);
    }

    #[tokio::test]
    async fn missing_tool_fails_step() {
        let (executor, recorder) = executor(&[]);
        let mut plan = plan_with(options());
        plan.add_step("nonexistent_tool", "Step 1", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::ToolNotFound(ref name) if name == "nonexistent_tool"));
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
        assert!(plan.steps[0].error().unwrap().contains("Tool not found"));
        assert_eq!(
            recorder.events(),
            vec!["start:step-1", "failed:step-1", "plan:partial"]
        );
    }

    #[tokio::test]
    async fn missing_tool_continue_on_error() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);
        let mut plan = plan_with(ExecutionOptions {
            stop_on_error: false,
            ..options()
        });
        plan.add_step("ghost", "Step 1", None);
        plan.add_step("tool1", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::StepsFailed { failed: 1, .. }));
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_tool_waits_for_in_flight_step() {
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_millis(50))
            .shared();
        let (executor, recorder) = executor(&[slow.clone()]);
        let mut plan = plan_with(options());
        plan.add_step("slow", "Step 1", None);
        plan.add_step("ghost", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::ToolNotFound(ref name) if name == "ghost"));
        assert_eq!(slow.calls(), 1);
        assert_eq!(plan.steps[0].status(), StepStatus::Completed);
        assert_eq!(plan.steps[0].error(), None);
        assert_eq!(plan.steps[1].status(), StepStatus::Failed);
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(
            recorder.events(),
            vec![
                "start:step-1",
                "complete:step-1",
                "start:step-2",
                "failed:step-2",
                "plan:partial"
            ]
        );
    }

    #[tokio::test]
    async fn unbounded_parallelism_setting_runs() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);
        let mut plan = plan_with(ExecutionOptions {
            allow_parallel: true,
            max_parallel_steps: usize::MAX,
            ..options()
        });
        plan.add_step("tool1", "Step 1", None);
        plan.add_step("tool1", "Step 2", None);
        plan.add_step("tool1", "Step 3", None);

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(tool.calls(), 3);
    }

    /// Panics before handing back a future.
    struct PanicOnCall;

    impl Tool for PanicOnCall {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Panics while building the call"
        }

        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> futures::future::BoxFuture<'_, Result<stepflow_core::types::ToolResult>> {
            panic!("boom while building the call")
        }
    }

    #[tokio::test]
    async fn tool_panicking_on_call_fails_step() {
        let tool = MockTool::new("tool1").shared();
        let mut registry = ToolRegistry::new();
        registry.register(PanicOnCall);
        registry.register_arc(tool.clone());
        let recorder = Arc::new(Recorder::default());
        let executor = Executor::new(Arc::new(registry)).with_listener(recorder.clone());

        let mut plan = plan_with(options());
        plan.add_step("explode", "Step 1", None);
        plan.add_step("tool1", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepflowError::ToolExecution { ref tool, ref message }
                if tool == "explode" && message == "tool panicked"
        ));
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
        assert_eq!(plan.steps[1].status(), StepStatus::Skipped);
        assert_eq!(recorder.count("plan:partial"), 1);
        assert_eq!(tool.calls(), 0);

        // The plan is settled, so it can be resumed.
        let err = executor
            .resume(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::ToolExecution { .. }));
        assert_eq!(plan.status(), PlanStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_on_same_plan_id_is_refused() {
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_secs(60))
            .shared();
        let (executor, _) = executor(&[slow]);
        let mut plan = plan_with(options());
        plan.add_step("slow", "Step 1", None);
        let mut copy = plan.clone();
        let plan_id = plan.id.clone();

        let first_run = RunContext::new();
        let first_ctx = test_context();
        let first = executor.execute(&first_run, &mut plan, &first_ctx);
        let second = async {
            while !executor.is_running(&plan_id) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let refused = executor
                .execute(&RunContext::new(), &mut copy, &test_context())
                .await;
            let signalled = executor.cancel_running(&plan_id, "stop");
            (refused, signalled)
        };
        let (first, (refused, signalled)) = tokio::join!(first, second);

        assert!(matches!(refused, Err(StepflowError::AlreadyExecuting)));
        assert_eq!(copy.status(), PlanStatus::Draft);
        assert!(signalled);
        assert!(matches!(first, Err(StepflowError::Cancelled(ref r)) if r == "stop"));
        assert!(!executor.is_running(&plan_id));
    }

    #[tokio::test]
    async fn rejects_executing_and_completed() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        plan.set_status(PlanStatus::Executing).unwrap();
        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::AlreadyExecuting));
        assert_eq!(plan.status(), PlanStatus::Executing);

        let mut done = plan_with(options());
        done.add_step("tool1", "Step 1", None);
        executor
            .execute(&RunContext::new(), &mut done, &test_context())
            .await
            .unwrap();
        let err = executor
            .execute(&RunContext::new(), &mut done, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::AlreadyCompleted));
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn resume_retries_failed_and_unblocks_skipped() {
        let flaky = MockTool::new("flaky").failing_times(1).shared();
        let after = MockTool::new("after").shared();
        let first = MockTool::new("first").shared();
        let (executor, _) = executor(&[first.clone(), flaky.clone(), after.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("first", "Step 1", None);
        plan.add_step("flaky", "Step 2", None).depends_on_step("step-1");
        plan.add_step("after", "Step 3", None).depends_on_step("step-2");

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[1].status(), StepStatus::Failed);
        assert_eq!(plan.steps[2].status(), StepStatus::Skipped);

        executor
            .resume(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(first.calls(), 1);
        assert_eq!(flaky.calls(), 2);
        assert_eq!(after.calls(), 1);
        assert!(plan.steps.iter().all(|s| s.error().is_none()));
    }

    #[tokio::test]
    async fn resume_on_completed_plan_is_noop() {
        let tool = MockTool::new("tool1").shared();
        let (executor, recorder) = executor(&[tool.clone()]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();
        executor
            .resume(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(tool.calls(), 1);
        assert_eq!(recorder.count("plan:"), 1);
    }

    #[tokio::test]
    async fn cancel_marks_remaining_steps() {
        let (executor, _) = executor(&[]);

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        plan.add_step("tool2", "Step 2", None);
        plan.add_step("tool3", "Step 3", None);
        plan.set_status(PlanStatus::Executing).unwrap();
        plan.steps[0].mark_running().unwrap();
        plan.steps[0].mark_completed("done".into()).unwrap();
        plan.steps[1].mark_running().unwrap();

        executor.cancel(&mut plan, "User cancelled");

        assert_eq!(plan.status(), PlanStatus::Cancelled);
        assert_eq!(plan.steps[0].status(), StepStatus::Completed);
        assert_eq!(plan.steps[1].status(), StepStatus::Skipped);
        assert_eq!(plan.steps[2].status(), StepStatus::Skipped);
        assert_eq!(plan.steps[1].error(), Some("User cancelled"));
    }

    #[tokio::test]
    async fn cancel_leaves_completed_plan() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool]);
        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        executor.cancel(&mut plan, "too late");
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert!(plan.steps[0].error().is_none());
    }

    #[tokio::test]
    async fn cancelled_plan_needs_resume() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);
        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);

        executor.cancel(&mut plan, "not now");
        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepflowError::PlanCancelled));

        executor
            .resume(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();
        assert_eq!(plan.status(), PlanStatus::Completed);
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_running_stops_in_flight_call() {
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_secs(60))
            .shared();
        let (executor, recorder) = executor(&[slow]);
        let executor = Arc::new(executor);

        let mut plan = plan_with(options());
        plan.add_step("slow", "Step 1", None);
        plan.add_step("slow", "Step 2", None);
        let plan_id = plan.id.clone();

        let canceller = {
            let executor = executor.clone();
            let plan_id = plan_id.clone();
            tokio::spawn(async move {
                while !executor.is_running(&plan_id) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                executor.cancel_running(&plan_id, "User cancelled")
            })
        };

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(canceller.await.unwrap());
        assert!(matches!(err, StepflowError::Cancelled(ref r) if r == "User cancelled"));
        assert_eq!(plan.status(), PlanStatus::Cancelled);
        assert_eq!(plan.steps[0].status(), StepStatus::Skipped);
        assert_eq!(plan.steps[1].error(), Some("User cancelled"));
        assert_eq!(recorder.count("plan:cancelled"), 1);
        assert!(!executor.cancel_running(&plan_id, "again"));
    }

    #[tokio::test]
    async fn on_step_failed_callback() {
        let tool = MockTool::new("tool1").with_error("tool error").shared();
        let failed = Arc::new(Mutex::new(Vec::new()));
        let seen = failed.clone();
        let executor = Executor::new(registry_with(&[tool])).on_step_failed(move |_, step, err| {
            seen.lock().unwrap().push((step.id.clone(), err.to_string()));
        });

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        let _ = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await;

        let failed = failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "step-1");
        assert!(failed[0].1.contains("tool error"));
    }

    #[tokio::test]
    async fn closure_callbacks_fire_in_order() {
        let tool = MockTool::new("tool1").shared();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let executor = Executor::new(registry_with(&[tool]))
            .on_step_start(move |_, s| a.lock().unwrap().push(format!("start:{}", s.id)))
            .on_step_complete(move |_, s| b.lock().unwrap().push(format!("done:{}", s.id)))
            .on_plan_complete(move |p| c.lock().unwrap().push(format!("plan:{}", p.status())));

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start:step-1", "done:step-1", "plan:completed"]
        );
    }

    #[tokio::test]
    async fn parameters_reach_tool() {
        let tool = MockTool::new("tool1").shared();
        let (executor, _) = executor(&[tool.clone()]);

        let mut params = Parameters::new();
        params.insert("key1".into(), serde_json::json!("value1"));
        params.insert("key2".into(), serde_json::json!(42));
        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", Some(params));

        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        let inputs = tool.inputs();
        assert_eq!(inputs[0]["key1"], "value1");
        assert_eq!(inputs[0]["key2"], 42);
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_fails_step() {
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_secs(10))
            .shared();
        let fast = MockTool::new("fast").shared();
        let (executor, _) = executor(&[slow, fast.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            stop_on_error: false,
            step_timeout_ms: 100,
            ..options()
        });
        plan.add_step("slow", "Step 1", None);
        plan.add_step("fast", "Step 2", None);

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::StepsFailed { failed: 1, .. }));
        assert_eq!(
            plan.steps[0].error(),
            Some("Tool timeout after 100ms: slow")
        );
        assert_eq!(plan.steps[1].status(), StepStatus::Completed);
        assert_eq!(fast.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_error_discards_in_flight_results() {
        let bad = MockTool::new("bad")
            .with_delay(Duration::from_millis(10))
            .with_error("boom")
            .shared();
        let slow = MockTool::new("slow")
            .with_delay(Duration::from_millis(100))
            .shared();
        let (executor, recorder) = executor(&[bad, slow.clone()]);

        let mut plan = plan_with(ExecutionOptions {
            allow_parallel: true,
            ..options()
        });
        plan.add_step("bad", "Step 1", None);
        plan.add_step("slow", "Step 2", None);
        plan.add_step("slow", "Step 3", None).depends_on_step("step-2");

        let err = executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("boom"));
        assert_eq!(plan.status(), PlanStatus::Partial);
        assert_eq!(plan.steps[0].status(), StepStatus::Failed);
        assert_eq!(plan.steps[1].status(), StepStatus::Skipped);
        assert_eq!(plan.steps[2].status(), StepStatus::Skipped);
        assert_eq!(slow.calls(), 1);
        assert_eq!(recorder.count("complete:"), 0);
    }

    #[tokio::test]
    async fn event_bus_listener_sees_run() {
        use crate::listener::EventBusListener;
        use stepflow_core::event::EventBus;
        use stepflow_core::types::PlanEvent;

        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let tool = MockTool::new("tool1").shared();
        let executor = Executor::new(registry_with(&[tool]))
            .with_listener(Arc::new(EventBusListener::new(bus.clone())));

        let mut plan = plan_with(options());
        plan.add_step("tool1", "Step 1", None);
        executor
            .execute(&RunContext::new(), &mut plan, &test_context())
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                PlanEvent::StepStarted { .. } => "started",
                PlanEvent::StepCompleted { .. } => "completed",
                PlanEvent::StepFailed { .. } => "failed",
                PlanEvent::PlanCompleted { .. } => "plan",
            });
        }
        assert_eq!(kinds, vec!["started", "completed", "plan"]);
    }
}
