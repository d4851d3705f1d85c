//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Optionally validates the DAG.
//! 2. Builds the adjacency list and in-degree table once.
//! 3. Repeatedly drains every ready node (in-degree 0) into a wave and
//!    dispatches the wave's members onto the worker pool.
//! 4. Awaits wave members in list order, each against a deadline measured
//!    from wave submission, and releases dependents of every success.
//! 5. Stops at the first failure, cancelling the wave members it has not
//!    awaited yet, and reports the terminal state.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tasks::{ProcessorRegistry, TaskContext, TaskResult};

use crate::cache::{idempotency_key, IdempotentCache};
use crate::dag::{build_graph, build_in_degree, validate_dag};
use crate::metrics::MetricsSink;
use crate::models::{
    WorkflowDefinition, WorkflowExecutionLog, WorkflowInstance, WorkflowNode, WORKFLOW_LOG_ID,
};
use crate::pool::WorkerPool;
use crate::report::{RunFailure, RunReport, RunStatus};
use crate::retry::RetryTemplate;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Budget for each node, counted from the submission of its wave.
    pub node_timeout: Duration,
    /// How long `shutdown` waits for in-flight nodes before cancelling them.
    pub shutdown_grace: Duration,
    /// Reject cycles and dangling edges before dispatching anything. When
    /// off, such graphs end FAILED with [`RunFailure::Incomplete`].
    pub validate_graph: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(5),
            validate_graph: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Single-node execution
// ---------------------------------------------------------------------------

/// Everything a spawned node task needs; cheap to clone.
#[derive(Clone)]
struct NodeRunner {
    registry: Arc<ProcessorRegistry>,
    cache: Arc<dyn IdempotentCache>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryTemplate,
    node_timeout: Duration,
}

impl NodeRunner {
    /// Run one node to a log. Never fails and never panics outward.
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        node: &WorkflowNode,
        cancel: CancellationToken,
    ) -> WorkflowExecutionLog {
        let key = idempotency_key(&instance.id, &node.id);
        if let Some(cached) = self.cache.get(&key).await {
            debug!(node = %node.id, %key, "idempotent cache hit; processor skipped");
            return cached;
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = AssertUnwindSafe(self.invoke(instance, node, &key, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EngineError::NodePanicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(result) => {
                let elapsed = start.elapsed();
                let result = result.timed(started_at, elapsed);
                self.metrics.record_latency(&node.processor_type, elapsed);
                self.metrics.record_result(&node.processor_type, &result);

                if result.is_success() {
                    let log = WorkflowExecutionLog::success(&node.id, &instance.id)
                        .with_output(result.output);
                    self.cache.put(&key, log.clone()).await;
                    log
                } else {
                    let message = result
                        .error_message
                        .unwrap_or_else(|| format!("task ended with status {:?}", result.status));
                    warn!(node = %node.id, %message, "node did not succeed");
                    WorkflowExecutionLog::failed(&node.id, &instance.id, message)
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(node = %node.id, error = %message, "node execution failed");
                self.metrics
                    .record_result(&node.processor_type, &TaskResult::failed(message.clone()));
                WorkflowExecutionLog::failed(&node.id, &instance.id, message)
            }
        }
    }

    async fn invoke(
        &self,
        instance: &WorkflowInstance,
        node: &WorkflowNode,
        key: &str,
        cancel: CancellationToken,
    ) -> Result<TaskResult, EngineError> {
        let processor = self
            .registry
            .find(&node.processor_type)
            .ok_or_else(|| EngineError::ProcessorNotFound(node.processor_type.clone()))?;

        let ctx = TaskContext::new(node.id.clone(), instance.id.clone())
            .with_idempotent_key(key)
            .with_parameters(node.config.clone())
            .with_label("processor_type", node.processor_type.clone())
            .with_timeout(self.node_timeout)
            .with_cancellation(cancel);

        Ok(self
            .retry
            .execute(&node.processor_type, processor.as_ref(), ctx)
            .await?)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// A wave member that has been handed to the pool.
struct DispatchedNode {
    handle: JoinHandle<WorkflowExecutionLog>,
    cancel: CancellationToken,
}

impl DispatchedNode {
    /// Best effort: signal the processor and abort the task at its next
    /// await point.
    fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflow definitions against injected collaborators.
///
/// One executor may serve many concurrent runs; they share the worker pool,
/// the idempotent cache, and the metrics sink.
pub struct WorkflowExecutor {
    runner: NodeRunner,
    pool: Arc<WorkerPool>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create an executor whose worker pool lives on the current runtime.
    ///
    /// # Errors
    /// [`EngineError::NoRuntime`] when called outside of a Tokio runtime.
    pub fn new(
        registry: Arc<ProcessorRegistry>,
        cache: Arc<dyn IdempotentCache>,
        metrics: Arc<dyn MetricsSink>,
        config: ExecutorConfig,
    ) -> Result<Self, EngineError> {
        let pool = Arc::new(WorkerPool::current()?);
        Ok(Self::with_pool(registry, cache, metrics, pool, config))
    }

    /// Create an executor on an existing (possibly shared) worker pool.
    pub fn with_pool(
        registry: Arc<ProcessorRegistry>,
        cache: Arc<dyn IdempotentCache>,
        metrics: Arc<dyn MetricsSink>,
        pool: Arc<WorkerPool>,
        config: ExecutorConfig,
    ) -> Self {
        let runner = NodeRunner {
            registry,
            cache,
            retry: RetryTemplate::new(Arc::clone(&metrics)),
            metrics,
            node_timeout: config.node_timeout,
        };
        Self {
            runner,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the workflow and return the synthetic `"workflow"` log.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        instance: &WorkflowInstance,
    ) -> WorkflowExecutionLog {
        self.run(definition, instance).await.summary
    }

    /// Run the workflow and return the full report.
    ///
    /// Never returns an error: every failure is described by the report.
    #[instrument(
        name = "workflow_run",
        skip_all,
        fields(workflow = %definition.name, instance_id = %instance.id)
    )]
    pub async fn run(&self, definition: &WorkflowDefinition, instance: &WorkflowInstance) -> RunReport {
        let started = Instant::now();
        let mut node_logs: Vec<WorkflowExecutionLog> = Vec::with_capacity(definition.nodes.len());
        let mut waves: Vec<Vec<String>> = Vec::new();
        let mut failure: Option<RunFailure> = None;

        info!(
            nodes = definition.nodes.len(),
            edges = definition.edges.len(),
            "workflow_started"
        );

        if self.config.validate_graph {
            if let Err(err) = validate_dag(definition) {
                error!(error = %err, "workflow graph rejected");
                failure = Some(RunFailure::GraphInvalid {
                    message: err.to_string(),
                });
                return finish(definition, instance, node_logs, waves, failure, started);
            }
        }

        // ------------------------------------------------------------------
        // Graph state, computed once.
        // ------------------------------------------------------------------
        let graph = build_graph(&definition.edges);
        let mut in_degree = build_in_degree(definition.nodes.values(), &definition.edges);

        let mut ready: VecDeque<&WorkflowNode> = definition
            .nodes
            .values()
            .filter(|node| in_degree.get(&node.id) == Some(&0))
            .collect();

        // ------------------------------------------------------------------
        // Wave loop.
        // ------------------------------------------------------------------
        while !ready.is_empty() && failure.is_none() {
            let wave: Vec<&WorkflowNode> = ready.drain(..).collect();
            let wave_ids: Vec<String> = wave.iter().map(|n| n.id.clone()).collect();
            info!(wave = waves.len() + 1, nodes = ?wave_ids, "dispatching wave");
            waves.push(wave_ids);

            let deadline = Instant::now() + self.config.node_timeout;
            let dispatched: Vec<_> = wave.iter().map(|node| self.dispatch(instance, node)).collect();
            let mut pending = wave.into_iter().zip(dispatched);

            while let Some((node, dispatch)) = pending.next() {
                let log = match dispatch {
                    Ok(mut task) => self.await_node(instance, node, &mut task, deadline).await,
                    Err(err) => WorkflowExecutionLog::failed(&node.id, &instance.id, err.to_string()),
                };

                if log.is_success() {
                    node_logs.push(log);
                    for dependent in graph.get(&node.id).into_iter().flatten() {
                        let Some(deg) = in_degree.get_mut(dependent) else {
                            continue;
                        };
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            if let Some(next) = definition.nodes.get(dependent) {
                                ready.push_back(next);
                            }
                        }
                    }
                    continue;
                }

                let message = log.error_message.clone().unwrap_or_default();
                error!(node = %node.id, error = %message, "node failed; stopping run");
                node_logs.push(log);
                failure = Some(RunFailure::NodeFailed {
                    node_id: node.id.clone(),
                    message,
                });

                for (sibling, rest) in pending.by_ref() {
                    if let Ok(task) = rest {
                        debug!(node = %sibling.id, "cancelling wave sibling");
                        task.cancel();
                    }
                }
                break;
            }
        }

        finish(definition, instance, node_logs, waves, failure, started)
    }

    /// Run a single node outside of a workflow run.
    ///
    /// Honours the idempotent cache exactly as a node inside a run does.
    pub async fn execute_node(
        &self,
        instance: &WorkflowInstance,
        node: &WorkflowNode,
    ) -> WorkflowExecutionLog {
        self.runner
            .execute(instance, node, self.pool.child_token())
            .await
    }

    /// Drain the worker pool: wait up to `shutdown_grace`, then cancel what
    /// is left. Runs still in progress see their pending nodes fail.
    ///
    /// Returns `true` when every in-flight node finished in time.
    pub async fn shutdown(&self) -> bool {
        let graceful = self.pool.shutdown(self.config.shutdown_grace).await;
        info!(graceful, "workflow executor shut down");
        graceful
    }

    fn dispatch(
        &self,
        instance: &WorkflowInstance,
        node: &WorkflowNode,
    ) -> Result<DispatchedNode, EngineError> {
        let cancel = self.pool.child_token();
        let runner = self.runner.clone();
        let instance = instance.clone();
        let node = node.clone();
        let token = cancel.clone();

        let handle = self
            .pool
            .spawn(async move { runner.execute(&instance, &node, token).await })?;
        Ok(DispatchedNode { handle, cancel })
    }

    async fn await_node(
        &self,
        instance: &WorkflowInstance,
        node: &WorkflowNode,
        task: &mut DispatchedNode,
        deadline: Instant,
    ) -> WorkflowExecutionLog {
        match tokio::time::timeout_at(deadline, &mut task.handle).await {
            Ok(Ok(log)) => log,
            Ok(Err(join_err)) => {
                let err = join_error(join_err);
                self.runner
                    .metrics
                    .record_result(&node.processor_type, &TaskResult::failed(err.to_string()));
                WorkflowExecutionLog::failed(&node.id, &instance.id, err.to_string())
            }
            Err(_elapsed) => {
                task.cancel();
                let err = EngineError::NodeTimeout(self.config.node_timeout);
                warn!(node = %node.id, timeout = ?self.config.node_timeout, "node timed out");
                self.runner.metrics.record_result(
                    &node.processor_type,
                    &TaskResult::cancelled(format!("Timeout: {err}")),
                );
                WorkflowExecutionLog::failed(&node.id, &instance.id, err.to_string())
            }
        }
    }
}

fn join_error(err: JoinError) -> EngineError {
    if err.is_panic() {
        EngineError::NodePanicked(panic_message(err.into_panic().as_ref()))
    } else {
        EngineError::NodeCancelled
    }
}

/// Decide the terminal state and assemble the report.
fn finish(
    definition: &WorkflowDefinition,
    instance: &WorkflowInstance,
    node_logs: Vec<WorkflowExecutionLog>,
    waves: Vec<Vec<String>>,
    mut failure: Option<RunFailure>,
    started: Instant,
) -> RunReport {
    if failure.is_none() && node_logs.len() != definition.nodes.len() {
        let logged: HashSet<&str> = node_logs.iter().map(|log| log.id.as_str()).collect();
        let never_run: Vec<String> = definition
            .nodes
            .values()
            .filter(|node| !logged.contains(node.id.as_str()))
            .map(|node| node.id.clone())
            .collect();
        warn!(?never_run, "run ended with nodes that never became ready");
        failure = Some(RunFailure::Incomplete { never_run });
    }

    let (status, summary) = match &failure {
        None => (
            RunStatus::Succeeded,
            WorkflowExecutionLog::success(WORKFLOW_LOG_ID, &instance.id),
        ),
        Some(failure) => (
            RunStatus::Failed,
            WorkflowExecutionLog::failed(WORKFLOW_LOG_ID, &instance.id, describe(failure)),
        ),
    };

    let elapsed = started.elapsed();
    match status {
        RunStatus::Succeeded => info!(?elapsed, nodes = node_logs.len(), "workflow_completed"),
        _ => error!(?elapsed, error = ?summary.error_message, "workflow_failed"),
    }

    RunReport {
        instance_id: instance.id.clone(),
        status,
        summary,
        node_logs,
        waves,
        failure,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

fn describe(failure: &RunFailure) -> String {
    match failure {
        RunFailure::NodeFailed { node_id, message } => format!("node '{node_id}' failed: {message}"),
        RunFailure::GraphInvalid { message } => format!("invalid workflow graph: {message}"),
        RunFailure::Incomplete { never_run } => {
            format!("nodes never became ready: {}", never_run.join(", "))
        }
    }
}
