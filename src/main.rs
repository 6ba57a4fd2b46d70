use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stepflow_core::config::AppConfig;
use stepflow_core::event::EventBus;
use stepflow_core::types::{PlanEvent, ToolContext};
use stepflow_engine::{
    format_plan, parse_plan_response_with, validate_plan, EventBusListener, ExecutionPlan,
    Executor, RunContext, ShellHookListener,
};
use stepflow_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "stepflow", version, about = "Run tool-invoking execution plans")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "stepflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file (planner JSON format)
    Run {
        /// Plan file
        plan: PathBuf,
        /// Approve the plan as this user
        #[arg(long)]
        approve: Option<String>,
        /// Run up to N independent steps at once
        #[arg(long)]
        parallel: Option<usize>,
        /// Keep going after a step fails
        #[arg(long)]
        continue_on_error: bool,
        /// Per-step timeout in milliseconds
        #[arg(long)]
        step_timeout_ms: Option<u64>,
        /// Write the final plan state (JSON) here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Resume a saved plan state, retrying steps that did not complete
    Resume {
        /// Plan state written by `run --save`
        state: PathBuf,
        /// Approve the plan as this user
        #[arg(long)]
        approve: Option<String>,
        /// Write the final plan state back to this file
        #[arg(long)]
        save: bool,
    },
    /// Lint a plan file against the built-in tools
    Validate {
        /// Plan file
        plan: PathBuf,
    },
    /// Render a plan file without running it
    Show {
        /// Plan file
        plan: PathBuf,
    },
    /// List available tools
    Tools,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stepflow=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "stepflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let tools = Arc::new(ToolRegistry::with_builtins());

    match cli.command {
        Commands::Run {
            plan,
            approve,
            parallel,
            continue_on_error,
            step_timeout_ms,
            save,
        } => {
            let mut plan = load_plan(&plan, &config)?;
            if let Some(n) = parallel {
                plan.options.allow_parallel = n > 1;
                plan.options.max_parallel_steps = n;
            }
            if continue_on_error {
                plan.options.stop_on_error = false;
            }
            if let Some(ms) = step_timeout_ms {
                plan.options.step_timeout_ms = ms;
            }
            if let Some(user) = approve {
                plan.approve(user);
            }
            run_plan(&config, tools, &mut plan, false, save.as_deref()).await?;
        }
        Commands::Resume {
            state,
            approve,
            save,
        } => {
            let content = std::fs::read_to_string(&state)
                .with_context(|| format!("reading {}", state.display()))?;
            let mut plan: ExecutionPlan = serde_json::from_str(&content)
                .with_context(|| format!("parsing plan state {}", state.display()))?;
            if let Some(user) = approve {
                plan.approve(user);
            }
            let save_to = save.then_some(state.as_path());
            run_plan(&config, tools, &mut plan, true, save_to).await?;
        }
        Commands::Validate { plan } => {
            let plan = load_plan(&plan, &config)?;
            let findings = validate_plan(&plan, &tools);
            if findings.is_empty() {
                println!("Plan is valid ({} steps)", plan.steps.len());
            } else {
                for finding in &findings {
                    println!("- {}", finding);
                }
                anyhow::bail!("{} problem(s) found", findings.len());
            }
        }
        Commands::Show { plan } => {
            let plan = load_plan(&plan, &config)?;
            print!("{}", format_plan(&plan));
        }
        Commands::Tools => {
            for def in tools.definitions() {
                println!("{:<8} {}", def.name, def.description);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        // Handled before config loading
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        Ok(AppConfig::load(path)?)
    } else {
        info!(path = %path.display(), "No config file, using defaults");
        Ok(AppConfig::default())
    }
}

fn load_plan(path: &Path, config: &AppConfig) -> anyhow::Result<ExecutionPlan> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let plan = parse_plan_response_with(&content, config.executor.clone())?;
    Ok(plan)
}

async fn run_plan(
    config: &AppConfig,
    tools: Arc<ToolRegistry>,
    plan: &mut ExecutionPlan,
    resume: bool,
    save: Option<&Path>,
) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::default());
    let progress = spawn_progress(bus.subscribe());

    let mut executor =
        Executor::new(tools).with_listener(Arc::new(EventBusListener::new(bus.clone())));
    if let Some(hooks) = config.hooks.clone().filter(|h| !h.is_empty()) {
        executor = executor.with_listener(Arc::new(ShellHookListener::new(hooks)));
    }

    let mut tool_ctx = ToolContext::new(config.tools.agent_id.clone());
    if let Some(dir) = config.working_dir() {
        tool_ctx = tool_ctx.with_working_dir(dir);
    }

    let ctx = RunContext::new();
    let token = ctx.token().clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Interrupted, stopping plan");
        token.cancel();
    });

    let result = if resume {
        executor.resume(&ctx, plan, &tool_ctx).await
    } else {
        executor.execute(&ctx, plan, &tool_ctx).await
    };

    drop(executor);
    drop(bus);
    progress.await.ok();

    print!("{}", format_plan(plan));

    if let Some(path) = save {
        std::fs::write(path, serde_json::to_string_pretty(&*plan)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Saved plan state");
    }

    result.map_err(Into::into)
}

/// Print one line per lifecycle event to stderr until the bus closes.
fn spawn_progress(
    mut rx: tokio::sync::broadcast::Receiver<PlanEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(PlanEvent::StepStarted { step_id, tool, .. }) => {
                    eprintln!("▶ {} ({})", step_id, tool);
                }
                Ok(PlanEvent::StepCompleted {
                    step_id, elapsed_ms, ..
                }) => {
                    eprintln!("✔ {} in {}ms", step_id, elapsed_ms);
                }
                Ok(PlanEvent::StepFailed { step_id, error, .. }) => {
                    eprintln!("✘ {}: {}", step_id, error);
                }
                Ok(PlanEvent::PlanCompleted {
                    status,
                    completed,
                    failed,
                    skipped,
                    ..
                }) => {
                    eprintln!(
                        "Plan {}: {} completed, {} failed, {} skipped",
                        status, completed, failed, skipped
                    );
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Progress output lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
