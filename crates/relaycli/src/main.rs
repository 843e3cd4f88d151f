// crates/relaycli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{ExecutionEvent, NodeEvent, NodeSpec, Workflow};
use relayruntime::{FlowRuntime, GraphIndex, NodeRegistry, RuntimeConfig};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay workflow runtime CLI", long_about = None)]
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

        /// Input data as JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> Result<NodeRegistry> {
    relaynodes::standard_registry().context("failed to register standard nodes")
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid workflow", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(&file, input, config).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: &Path, input: Option<String>, config: Option<PathBuf>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let input: Value = match input {
        Some(text) => serde_json::from_str(&text).context("input must be valid JSON")?,
        None => json!({}),
    };

    let config = match config {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let runtime = FlowRuntime::with_config(registry()?, config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::NodeExecuteBefore {
                    node_id,
                    node_type,
                    attempt,
                    ..
                } => {
                    if attempt > 1 {
                        println!(
                            "  🔁 Retrying node: {} ({}), attempt {}",
                            node_id, node_type, attempt
                        );
                    } else {
                        println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                    }
                }
                ExecutionEvent::NodeExecuteAfter {
                    node_id, duration_ms, ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeExecuteError { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message)
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message)
                    }
                    NodeEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", node_id, percent, msg),
                        None => println!("     📊 [{}] {}%", node_id, percent),
                    },
                },
                ExecutionEvent::ExecutionFinish {
                    status,
                    error,
                    duration_ms,
                    ..
                } => match error {
                    Some(error) => println!(
                        "💥 Execution {} after {}ms: {}",
                        status, duration_ms, error
                    ),
                    None => println!("✨ Execution {} in {}ms", status, duration_ms),
                },
            }
        }
    });

    // Ctrl-C cancels the run instead of killing the process mid-step
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling execution");
            on_signal.cancel();
        }
    });

    let execution_id = uuid::Uuid::new_v4().to_string();
    let result = runtime
        .execute_with(&execution_id, &workflow, input, Some(cancel))
        .await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = match result {
        Ok(result) => result,
        Err(e) => bail!("execution {} failed [{}]: {}", execution_id, e.code(), e),
    };

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {}", result.status);
    println!(
        "   Nodes: {} run, {} succeeded, {} failed, {} retries",
        result.metrics.node_count,
        result.metrics.success_count,
        result.metrics.error_count,
        result.metrics.retry_count
    );

    if !result.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        println!("{}", serde_json::to_string_pretty(&result.outputs)?);
    }

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let workflow = load_workflow(file)?;
    let registry = registry()?;

    let graph = GraphIndex::build(&workflow)?;

    let mut triggers = Vec::new();
    for node in &workflow.nodes {
        let registered = registry.require(&node.node_type)?;
        if registered.is_trigger() {
            triggers.push(node.id.clone());
        }
    }
    if triggers.len() > 1 {
        bail!("workflow has more than one trigger: {}", triggers.join(", "));
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    match triggers.first() {
        Some(trigger) => println!("   Trigger: {}", trigger),
        None => println!("   Entry nodes: {}", graph.entries().join(", ")),
    }
    println!("   Final nodes: {}", graph.sinks().join(", "));

    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let registry = registry()?;
    for node_type in registry.list_node_types() {
        if let Some(description) = registry.get_description(&node_type) {
            println!("  • {} ({})", node_type, description.category);
            println!("    {}", description.description);
            for property in &description.properties {
                let marker = if property.required { "*" } else { " " };
                println!("      {}{}: {}", marker, property.name, property.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }

    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example HTTP Workflow");
    workflow.description = Some("Fetches data from an API and logs the result".to_string());

    workflow.add_node(NodeSpec::new("start", "trigger.manual").with_name("Start"));
    workflow.add_node(
        NodeSpec::new("fetch", "http.request")
            .with_name("Fetch Data")
            .with_parameter("url", "{{ $json.url }}")
            .with_parameter("method", "GET")
            .with_retry(2, 500, "stop"),
    );
    workflow.add_node(
        NodeSpec::new("log", "debug.log")
            .with_name("Log Response")
            .with_parameter("message", "Got status {{ $json.status }}"),
    );

    workflow.connect("start", 0, "fetch", 0);
    workflow.connect("fetch", 0, "log", 0);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  relay run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
