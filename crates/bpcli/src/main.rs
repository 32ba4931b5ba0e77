// crates/bpcli/src/main.rs

use anyhow::{Context, Result};
use bpcore::{ExecutionEvent, JoinMode, NodeSpec, Value, Workflow};
use bpruntime::{
    BranchOverflow, EngineConfig, ExecutionPlan, FlowRuntime, ProcessRegistry, RuntimeConfig,
};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bpflow")]
#[command(about = "Process-flow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Run variables as a JSON object
        #[arg(long)]
        vars: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Cancel branches still running once their join settled
        #[arg(long)]
        cancel_losers: bool,

        /// Queue branches beyond a gateway's concurrency cap instead of skipping them
        #[arg(long)]
        queue_branches: bool,

        /// Reject cyclic workflows
        #[arg(long)]
        strict: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Print the compiled execution plan as JSON
    Plan {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available processes
    Processes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            vars,
            verbose,
            cancel_losers,
            queue_branches,
            strict,
        } => {
            init_tracing(verbose);
            let engine = EngineConfig {
                reject_cycles: strict,
                branch_overflow: if queue_branches {
                    BranchOverflow::Queue
                } else {
                    BranchOverflow::Skip
                },
                cancel_losers,
            };
            run_workflow(&file, vars, engine).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Plan { file } => {
            let workflow = load_workflow(&file)?;
            let plan = ExecutionPlan::build(&workflow)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }

        Commands::Processes => {
            list_processes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

fn parse_vars(vars: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(vars) = vars else {
        return Ok(HashMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&vars)?;
    match json {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        _ => Err(anyhow::anyhow!("Variables must be a JSON object")),
    }
}

fn standard_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    bpnodes::register_all(&mut registry);
    registry
}

async fn run_workflow(file: &Path, vars: Option<String>, engine: EngineConfig) -> Result<()> {
    println!("Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;

    println!("Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let variables = parse_vars(vars)?;
    let runtime = FlowRuntime::with_config(
        Arc::new(standard_registry()),
        RuntimeConfig {
            engine,
            ..RuntimeConfig::default()
        },
    );

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { execution_id, .. } => {
                    println!("> Execution {} started", execution_id);
                }
                ExecutionEvent::NodeStarted { node_id, .. } => {
                    println!("  - {} started", node_id);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "  + {} completed in {}ms",
                        node_id,
                        duration_ms.unwrap_or_default()
                    );
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  x {} failed: {}", node_id, error);
                }
                ExecutionEvent::WorkflowCompleted { duration_ms, .. } => {
                    println!("Workflow completed in {}ms", duration_ms);
                }
                ExecutionEvent::WorkflowFailed { error, .. } => {
                    println!("Workflow failed: {}", error);
                }
            }
        }
    });

    let result = runtime.execute(&workflow, variables).await;

    // give the listener a moment to drain
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let report = result?;
    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", report.context.execution_id);
    println!("   Status: {}", report.status());
    println!(
        "   Completed: {}/{} nodes",
        report.completed_nodes(),
        workflow.nodes.len()
    );

    let mut ids: Vec<_> = report.states.keys().cloned().collect();
    ids.sort();
    for id in ids {
        if let Some(result) = report.state(&id).and_then(|s| s.result.as_ref()) {
            println!("   {}: {:?}", id, result);
        }
    }

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("Validating workflow: {}", file.display());
    let workflow = load_workflow(file)?;
    let plan = ExecutionPlan::build(&workflow)?;

    let registry = standard_registry();
    let known = registry.list_process_ids();
    for node in &workflow.nodes {
        if let bpcore::NodeKind::Process(config) = &node.kind {
            if !known.contains(&config.process_id) {
                println!(
                    "   warning: node {} uses unknown process '{}'",
                    node.id, config.process_id
                );
            }
        }
    }
    if plan.start_node.is_none() {
        println!("   warning: no start node");
    }
    if let Err(err) = plan.validate_acyclic() {
        println!("   warning: {}", err);
    }

    println!("Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Gateways: {}", plan.gateways.len());
    Ok(())
}

fn list_processes() {
    println!("Available processes:");
    println!();

    let registry = standard_registry();
    for process_id in registry.list_process_ids() {
        if let Some(metadata) = registry.get_metadata(&process_id) {
            println!("  * {} ({})", process_id, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  * {}", process_id);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example Parallel Workflow");
    workflow.description = Some("Logs, fans out to two branches and joins them".to_string());

    workflow.add_node(NodeSpec::start("start").with_position(0.0, 100.0));
    workflow.add_node(
        NodeSpec::process("prepare", "debug.log")
            .with_name("Prepare")
            .with_parameter("message", "preparing")
            .with_position(150.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::parallel("fork", JoinMode::All)
            .with_max_concurrency(2)
            .with_position(300.0, 100.0),
    );
    workflow.add_node(
        NodeSpec::process("wait", "time.delay")
            .with_name("Wait")
            .with_parameter("delay_ms", 250i64)
            .with_position(450.0, 50.0),
    );
    workflow.add_node(
        NodeSpec::process("report", "debug.log")
            .with_name("Report")
            .with_parameter("message", "reporting")
            .with_position(450.0, 150.0),
    );
    workflow.add_node(NodeSpec::parallel("merge", JoinMode::All).with_position(600.0, 100.0));
    workflow.add_node(NodeSpec::end("end").with_position(750.0, 100.0));

    workflow.connect("start", "prepare");
    workflow.connect("prepare", "fork");
    workflow.connect_port("fork", "slow", "wait");
    workflow.connect_port("fork", "fast", "report");
    workflow.connect("wait", "merge");
    workflow.connect("report", "merge");
    workflow.connect("merge", "end");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  bpflow run --file {}", output.display());

    Ok(())
}
