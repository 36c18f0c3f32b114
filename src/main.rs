use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ordra_core::config::{EngineConfig, LogConfig};
use ordra_core::context::{ExecutionContext, Updates};
use ordra_dag::{Graph, HandlerRegistry, ParallelExecutor, RunOutcome};

#[derive(Parser)]
#[command(name = "ordra", version, about = "DAG workflow orchestration engine")]
struct Cli {
    /// Path to config file (defaults apply when it does not exist)
    #[arg(short, long, default_value = "ordra.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a workflow spec
    Check {
        /// Spec file (.yaml, .yml, .toml or .json)
        spec: PathBuf,
    },
    /// Print the execution waves of a workflow spec
    Plan {
        spec: PathBuf,
    },
    /// Run a workflow with stub handlers that emit null for every declared output
    DryRun {
        spec: PathBuf,
        /// JSON file holding the initial context object
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Check { spec } => {
            let graph = load_graph(&spec)?;
            println!(
                "{}: {} nodes, {} edges, {} waves",
                graph.name().unwrap_or("<unnamed>"),
                graph.len(),
                graph.edges().len(),
                graph.levels().len()
            );
        }
        Commands::Plan { spec } => {
            let graph = load_graph(&spec)?;
            for (i, wave) in graph.levels().iter().enumerate() {
                println!("wave {}:", i + 1);
                for id in wave {
                    let Some(node) = graph.node(id) else { continue };
                    match &node.when {
                        Some(expr) => println!("  {} [{}] when {}", node.id, node.handler, expr),
                        None => println!("  {} [{}]", node.id, node.handler),
                    }
                }
            }
        }
        Commands::DryRun { spec, context } => {
            let graph = load_graph(&spec)?;
            let initial = match context {
                Some(path) => load_context(&path)?,
                None => ExecutionContext::new(),
            };
            let executor = ParallelExecutor::with_config(stub_registry(&graph), &config.executor);
            let result = executor.run(&graph, initial).await?;
            if let Some(outcome) = RunOutcome::from_context(&result) {
                info!(completed = outcome.completed.len(), "Dry run finished");
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    Graph::from_path(path).with_context(|| format!("loading spec {}", path.display()))
}

fn load_context(path: &Path) -> anyhow::Result<ExecutionContext> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading context {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)?;
    ExecutionContext::from_json(value)
        .with_context(|| format!("{} must hold a JSON object", path.display()))
}

/// One stub per handler name; each writes `null` for the node's declared outputs.
fn stub_registry(graph: &Graph) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let names: BTreeSet<&str> = graph.nodes().iter().map(|n| n.handler.as_str()).collect();
    for name in names {
        registry.register_fn(name, |_, node| {
            if node.outputs.is_empty() {
                warn!(node_id = %node.id, "Node declares no outputs");
            }
            Ok(node
                .outputs
                .iter()
                .map(|key| (key.clone(), Value::Null))
                .collect::<Updates>())
        });
    }
    registry
}
