// crates/dagcli/src/main.rs

mod demos;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use dagcore::{ExecutionEvent, StepStatus, Value, WorkflowState, WorkflowStatus};
use dagruntime::{DagRuntime, EngineConfig, LoggingObserver, WorkflowObserver};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "DAG workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a built-in demo workflow
    Run {
        /// Demo name (see `dag list`)
        demo: String,

        /// Extra initial context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the execution plan of a demo workflow
    Plan {
        demo: String,
    },

    /// List demos, tools and functions
    List,
}

#[derive(Args)]
struct EngineArgs {
    /// Maximum number of steps running at once
    #[arg(long, default_value_t = 5)]
    max_parallel: usize,

    /// Per-step deadline in milliseconds
    #[arg(long)]
    step_timeout_ms: Option<u64>,

    /// Ignore step retry policies
    #[arg(long)]
    no_retries: bool,
}

impl EngineArgs {
    fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_max_parallel_steps(self.max_parallel)
            .with_retries(!self.no_retries);
        if let Some(ms) = self.step_timeout_ms {
            config = config.with_step_timeout(Duration::from_millis(ms));
        }
        config
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { demo, input, engine } => {
            run_demo(&demo, input, engine.into_config(), cli.verbose).await?;
        }

        Commands::Plan { demo } => {
            plan_demo(&demo).await?;
        }

        Commands::List => {
            list_all();
        }
    }

    Ok(())
}

fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()),
        _ => Err(anyhow!("Input must be a JSON object")),
    }
}

fn build_runtime(config: EngineConfig, verbose: bool) -> DagRuntime {
    let observers: Vec<Arc<dyn WorkflowObserver>> = if verbose {
        vec![Arc::new(LoggingObserver)]
    } else {
        Vec::new()
    };
    DagRuntime::with_observers(demos::demo_tools(), demos::demo_functions(), config, observers)
}

async fn run_demo(
    name: &str,
    input: Option<String>,
    config: EngineConfig,
    verbose: bool,
) -> Result<()> {
    let runtime = build_runtime(config, verbose);
    let (workflow, mut initial) = demos::build(name, runtime.executor(), runtime.functions())?;
    initial.extend(parse_input(input)?);

    println!("Workflow: {} ({} steps)", workflow.name, workflow.len());
    if !workflow.description.is_empty() {
        println!("  {}", workflow.description);
    }
    println!();

    let workflow_id = runtime.register_workflow(workflow).await;

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::StepStarted { step_id, step_kind, .. } => {
                    println!("  > {} ({})", step_id, step_kind);
                }
                ExecutionEvent::StepCompleted { step_id, result, duration_ms, .. } => {
                    println!("  ✓ {} = {} [{}ms]", step_id, result, duration_ms);
                }
                ExecutionEvent::StepFailed { step_id, error, .. } => {
                    println!("  ✗ {}: {}", step_id, error);
                }
                ExecutionEvent::StepSkipped { step_id, reason, .. } => {
                    println!("  - {} skipped: {}", step_id, reason);
                }
                ExecutionEvent::StepRetrying { step_id, retry, delay_ms, error, .. } => {
                    println!("  ↻ {} retry {} in {}ms ({})", step_id, retry, delay_ms, error);
                }
                _ => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    tracing::info!(demo = %name, %workflow_id, "Starting demo workflow");
    let state = runtime.run_workflow(&workflow_id, initial, cancel).await?;

    // Let the listener drain what is already queued.
    tokio::time::sleep(Duration::from_millis(50)).await;
    event_task.abort();

    print_summary(&state);

    match state.status {
        WorkflowStatus::Completed => Ok(()),
        _ => Err(anyhow!(
            "workflow ended {:?}: {}",
            state.status,
            state.error.unwrap_or_default()
        )),
    }
}

fn print_summary(state: &WorkflowState) {
    println!();
    println!("Status: {:?}", state.status);
    if let Some(duration) = state.duration() {
        println!("Duration: {}ms", duration.as_millis());
    }

    let mut results: Vec<_> = state.step_results.values().collect();
    results.sort_by(|a, b| a.step_id.cmp(&b.step_id));
    println!("Steps:");
    for result in results {
        match result.status {
            StepStatus::Failed => println!(
                "  {:<16} {:?}: {}",
                result.step_id,
                result.status,
                result.error.as_deref().unwrap_or("")
            ),
            _ => println!("  {:<16} {:?}", result.step_id, result.status),
        }
    }

    let context = Value::Object(state.context.snapshot());
    match serde_json::to_string_pretty(&context.to_json()) {
        Ok(json) => println!("Context:\n{}", json),
        Err(e) => println!("Context could not be rendered: {}", e),
    }
}

async fn plan_demo(name: &str) -> Result<()> {
    let runtime = DagRuntime::with_registries(
        demos::demo_tools(),
        demos::demo_functions(),
        EngineConfig::default(),
    );
    let (workflow, _) = demos::build(name, runtime.executor(), runtime.functions())?;
    let workflow_id = runtime.register_workflow(workflow).await;

    let plan = runtime.create_execution_plan(&workflow_id).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn list_all() {
    println!("Demos:");
    for (name, description) in demos::DEMOS {
        println!("  {:<12} {}", name, description);
    }

    let tools = demos::demo_tools();
    println!();
    println!("Tools:");
    for name in tools.list_tools() {
        if let Some(metadata) = tools.get_metadata(&name) {
            println!("  {:<12} {} ({})", name, metadata.description, metadata.category);
        }
    }

    println!();
    println!("Functions:");
    for name in demos::demo_functions().list_functions() {
        println!("  {}", name);
    }
}
