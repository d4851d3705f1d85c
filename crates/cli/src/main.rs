//! `dagflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`   - check a workflow JSON file and print its execution order.
//! - `run`        - execute a workflow file with the built-in processors.
//! - `processors` - list the built-in processor types.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{
    ExecutorConfig, InMemoryIdempotentCache, MetricsCollector, WorkflowDefinition,
    WorkflowExecutor, WorkflowInstance,
};
use tasks::builtin::register_builtins;
use tasks::ProcessorRegistry;

#[derive(Parser)]
#[command(name = "dagflow", about = "Run DAG workflows in parallel waves", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition and print the run report as JSON.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Id for this run, used in logs and cache keys. Defaults to a fresh id.
        #[arg(long)]
        instance_id: Option<String>,
        /// Per-node budget, counted from the start of the node's wave.
        #[arg(long, env = "DAGFLOW_NODE_TIMEOUT_MS", default_value_t = 300_000)]
        node_timeout_ms: u64,
        /// How long shutdown waits for in-flight nodes.
        #[arg(long, env = "DAGFLOW_SHUTDOWN_GRACE_MS", default_value_t = 5_000)]
        shutdown_grace_ms: u64,
        /// Skip graph validation; malformed graphs then end incomplete.
        #[arg(long)]
        no_validate: bool,
    },
    /// List the built-in processor types.
    Processors,
}

fn load_workflow(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

/// The run's instance. Each process starts with an empty cache, so the id
/// only names the run.
fn instance_for(workflow: &WorkflowDefinition, instance_id: Option<String>) -> WorkflowInstance {
    match instance_id {
        Some(id) => WorkflowInstance {
            workflow_id: Some(workflow.id),
            ..WorkflowInstance::new(id)
        },
        None => WorkflowInstance::of(workflow),
    }
}

/// Collect emitted metrics in memory so a run can summarise them on exit.
fn install_metrics_recorder() -> anyhow::Result<Snapshotter> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::set_global_recorder(recorder)
        .map_err(|_| anyhow::anyhow!("metrics recorder already installed"))?;
    MetricsCollector::describe();
    Ok(snapshotter)
}

fn log_metrics(snapshotter: &Snapshotter) {
    for (key, _unit, _desc, value) in snapshotter.snapshot().into_vec() {
        let key = key.key();
        let labels: Vec<String> = key
            .labels()
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        match value {
            DebugValue::Counter(n) => {
                info!(metric = key.name(), labels = ?labels, value = n, "counter");
            }
            DebugValue::Gauge(v) => {
                info!(metric = key.name(), labels = ?labels, value = v.0, "gauge");
            }
            DebugValue::Histogram(samples) => {
                let total: f64 = samples.iter().map(|s| s.0).sum();
                info!(
                    metric = key.name(),
                    labels = ?labels,
                    count = samples.len(),
                    sum = total,
                    "histogram"
                );
            }
        }
    }
}

fn builtin_registry() -> anyhow::Result<Arc<ProcessorRegistry>> {
    let registry = ProcessorRegistry::new();
    register_builtins(&registry).context("failed to register built-in processors")?;
    Ok(Arc::new(registry))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            match engine::validate_dag(&workflow) {
                Ok(order) => {
                    println!("Workflow is valid. Execution order: {order:?}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Run {
            path,
            instance_id,
            node_timeout_ms,
            shutdown_grace_ms,
            no_validate,
        } => {
            let workflow = load_workflow(&path)?;
            let instance = instance_for(&workflow, instance_id);
            let config = ExecutorConfig {
                node_timeout: Duration::from_millis(node_timeout_ms),
                shutdown_grace: Duration::from_millis(shutdown_grace_ms),
                validate_graph: !no_validate,
            };

            let snapshotter = install_metrics_recorder()?;
            let executor = WorkflowExecutor::new(
                builtin_registry()?,
                Arc::new(InMemoryIdempotentCache::new()),
                Arc::new(MetricsCollector::new()),
                config,
            )?;

            info!(workflow = %workflow.name, instance_id = %instance.id, "starting run");
            let report = executor.run(&workflow, &instance).await;
            executor.shutdown().await;

            log_metrics(&snapshotter);

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Processors => {
            for entry in builtin_registry()?.list() {
                println!("{}:{}", entry.name, entry.version);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
