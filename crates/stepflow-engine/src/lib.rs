//! Plan execution engine.
//!
//! An [`ExecutionPlan`] is an ordered list of [`Step`]s, each naming a tool
//! from a [`ToolRegistry`](stepflow_tools::ToolRegistry), with explicit
//! `depends_on` edges. The [`Executor`] drives a plan to a terminal status:
//! it asks the [`resolver`] for runnable steps on every tick, dispatches them
//! (sequentially or through a bounded semaphore), applies the stop-on-error
//! policy and reports every transition to its [`PlanListener`]s.

pub mod context;
pub mod executor;
pub mod listener;
pub mod plan;
pub mod planner;
pub mod render;
pub mod resolver;
pub mod status;
pub mod validate;

pub use context::RunContext;
pub use executor::Executor;
pub use listener::{EventBusListener, PlanListener, ShellHookListener};
pub use plan::{ExecutionPlan, Parameters, PlanSummary, Step};
pub use planner::{parse_plan_response, parse_plan_response_with};
pub use render::format_plan;
pub use resolver::{requeue_for_resume, resolve, Resolution};
pub use status::{PlanStatus, StepStatus};
pub use stepflow_core::config::ExecutionOptions;
pub use validate::{check_dependencies, validate_plan};
