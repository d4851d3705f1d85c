//! End-to-end tests for the workflow execution engine.
//!
//! These tests drive `WorkflowExecutor` with `MockProcessor`s, the in-memory
//! cache and a thread-local debugging metrics recorder, so no external
//! services are required.
//! Timing-sensitive tests run on a paused Tokio clock.

use std::sync::Arc;
use std::time::Duration;

use tasks::mock::{MockBehaviour, MockProcessor};
use tasks::{ProcessorRegistry, RetryPolicy};

use crate::metrics::capture::MetricsCapture;
use crate::metrics::{TASK_EXECUTIONS, TASK_LATENCY_SECONDS, TASK_RETRIES};
use crate::{
    idempotency_key, ExecutorConfig, IdempotentCache, InMemoryIdempotentCache, LogStatus,
    MetricsCollector, RunFailure, RunStatus, WorkflowDefinition, WorkflowEdge, WorkflowExecutor,
    WorkflowInstance, WorkflowNode, WORKFLOW_LOG_ID,
};

struct Harness {
    registry: Arc<ProcessorRegistry>,
    cache: Arc<InMemoryIdempotentCache>,
    metrics: MetricsCapture,
    executor: WorkflowExecutor,
}

fn harness_with(config: ExecutorConfig) -> Harness {
    let registry = Arc::new(ProcessorRegistry::new());
    let cache = Arc::new(InMemoryIdempotentCache::new());
    let metrics = MetricsCapture::install();
    let executor = WorkflowExecutor::new(
        registry.clone(),
        cache.clone(),
        Arc::new(MetricsCollector::new()),
        config,
    )
    .expect("inside a runtime");
    Harness {
        registry,
        cache,
        metrics,
        executor,
    }
}

fn harness() -> Harness {
    harness_with(ExecutorConfig::default())
}

impl Harness {
    /// Register `processor` under `processor_type` and hand back a handle for
    /// call-count assertions.
    fn register(&self, processor_type: &str, processor: MockProcessor) -> Arc<MockProcessor> {
        let processor = Arc::new(processor);
        self.registry
            .register(processor_type, processor.clone())
            .expect("unique processor type");
        processor
    }
}

/// One node per id, each bound to the processor type of the same name.
fn workflow(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowDefinition {
    WorkflowDefinition::new(
        "test",
        ids.iter().map(|id| WorkflowNode::new(*id, *id)).collect(),
        edges.iter().map(|(f, t)| WorkflowEdge::new(*f, *t)).collect(),
    )
    .expect("unique node ids")
}

//   A
//  / \
// B   C
//  \ /
//   D
fn diamond() -> WorkflowDefinition {
    workflow(
        &["a", "b", "c", "d"],
        &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    )
}

// ============================================================
// Happy path
// ============================================================

#[tokio::test]
async fn diamond_runs_in_three_waves() {
    let h = harness();
    let mocks: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| h.register(id, MockProcessor::succeeding(*id)))
        .collect();

    let report = h.executor.run(&diamond(), &WorkflowInstance::new("run-1")).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.summary.id, WORKFLOW_LOG_ID);
    assert_eq!(report.summary.status, LogStatus::Success);
    assert_eq!(
        report.waves,
        vec![vec!["a"], vec!["b", "c"], vec!["d"]]
    );
    assert_eq!(report.node_logs.len(), 4);
    assert!(report.node_logs.iter().all(|log| log.is_success()));
    assert!(mocks.iter().all(|m| m.call_count() == 1));
    assert_eq!(report.failure, None);
}

#[tokio::test]
async fn execute_returns_the_summary_log() {
    let h = harness();
    h.register("solo", MockProcessor::succeeding("solo"));

    let log = h
        .executor
        .execute(&workflow(&["solo"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(log.id, "workflow");
    assert_eq!(log.instance_id, "run-1");
    assert!(log.is_success());
}

#[tokio::test]
async fn node_output_and_parameters_flow_through() {
    let h = harness();
    h.register("extract", MockProcessor::returning("extract", serde_json::json!({ "rows": 3 })));

    let report = h
        .executor
        .run(&workflow(&["extract"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    let output = report.node_log("extract").unwrap().output.clone().unwrap();
    assert_eq!(output["rows"], 3);
    assert_eq!(output["processor"], "extract");
}

#[tokio::test(start_paused = true)]
async fn wave_members_run_concurrently() {
    let h = harness();
    h.register("a", MockProcessor::succeeding("a"));
    h.register("b", MockProcessor::sleeping("b", Duration::from_secs(1)));
    h.register("c", MockProcessor::sleeping("c", Duration::from_secs(1)));
    h.register("d", MockProcessor::succeeding("d"));

    let report = h.executor.run(&diamond(), &WorkflowInstance::new("run-1")).await;

    assert!(report.succeeded());
    // b and c overlap, so the run takes one second rather than two.
    assert!(report.elapsed_ms >= 1000);
    assert!(report.elapsed_ms < 2000);
}

#[tokio::test]
async fn concurrent_runs_share_one_executor() {
    let h = harness();
    let solo = h.register("solo", MockProcessor::succeeding("solo"));
    let def = workflow(&["solo"], &[]);
    let (first, second) = (WorkflowInstance::new("run-1"), WorkflowInstance::new("run-2"));

    let (r1, r2) = tokio::join!(h.executor.run(&def, &first), h.executor.run(&def, &second));

    assert!(r1.succeeded() && r2.succeeded());
    assert_eq!(solo.call_count(), 2);
}

// ============================================================
// Fail-fast
// ============================================================

#[tokio::test]
async fn failed_branch_never_schedules_dependents() {
    let h = harness();
    h.register("a", MockProcessor::succeeding("a"));
    h.register("b", MockProcessor::failing("b", "bad input"));
    h.register("c", MockProcessor::succeeding("c"));
    let d = h.register("d", MockProcessor::succeeding("d"));

    // A→C is listed first so C is awaited before B within the second wave.
    let def = workflow(
        &["a", "b", "c", "d"],
        &[("a", "c"), ("a", "b"), ("b", "d"), ("c", "d")],
    );
    let report = h.executor.run(&def, &WorkflowInstance::new("run-1")).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.summary.status, LogStatus::Failed);
    assert!(report.node_log("a").unwrap().is_success());
    assert!(report.node_log("c").unwrap().is_success());
    assert_eq!(
        report.node_log("b").unwrap().error_message.as_deref(),
        Some("bad input")
    );
    assert!(report.node_log("d").is_none());
    assert_eq!(d.call_count(), 0);
    assert_eq!(
        report.failure,
        Some(RunFailure::NodeFailed {
            node_id: "b".into(),
            message: "bad input".into()
        })
    );
}

#[tokio::test]
async fn failure_blocks_transitive_dependents() {
    let h = harness();
    h.register("a", MockProcessor::failing_fatal("a", "broken"));
    let b = h.register("b", MockProcessor::succeeding("b"));
    let c = h.register("c", MockProcessor::succeeding("c"));

    let report = h
        .executor
        .run(&workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.waves.len(), 1);
    assert_eq!(b.call_count() + c.call_count(), 0);
    assert_eq!(
        report.node_log("a").unwrap().error_message.as_deref(),
        Some("fatal task error: broken")
    );
}

#[tokio::test(start_paused = true)]
async fn failure_cancels_siblings_not_yet_awaited() {
    let h = harness();
    h.register("x", MockProcessor::failing("x", "nope"));
    h.register("y", MockProcessor::sleeping("y", Duration::from_secs(3600)));

    let report = h
        .executor
        .run(&workflow(&["x", "y"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.waves, vec![vec!["x", "y"]]);
    assert!(report.node_log("y").is_none());
    // The run did not sit out y's hour-long sleep.
    assert!(report.elapsed_ms < 1000);
}

#[tokio::test(start_paused = true)]
async fn siblings_are_awaited_in_list_order() {
    let h = harness();
    h.register("a", MockProcessor::sleeping("a", Duration::from_secs(1)));
    h.register("b", MockProcessor::failing("b", "nope"));

    let report = h
        .executor
        .run(&workflow(&["a", "b"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    // b failed first in wall-clock time, but a is awaited first and succeeds.
    assert_eq!(report.status, RunStatus::Failed);
    let ids: Vec<_> = report.node_logs.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(report.node_log("a").unwrap().is_success());
    assert!(report.elapsed_ms >= 1000);
}

#[tokio::test]
async fn panicking_processor_fails_its_node() {
    let h = harness();
    h.register("boom", MockProcessor::panicking("boom", "kaboom"));

    let report = h
        .executor
        .run(&workflow(&["boom"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.node_log("boom").unwrap().error_message.as_deref(),
        Some("processor panicked: kaboom")
    );
    assert_eq!(h.metrics.snapshot().results("boom", "FAILED"), 1);
}

// ============================================================
// Unregistered processor and timeouts
// ============================================================

#[tokio::test]
async fn unregistered_processor_type_fails_the_run() {
    let h = harness();
    let def = WorkflowDefinition::new("ghostly", vec![WorkflowNode::new("n", "ghost")], vec![])
        .unwrap();

    let report = h.executor.run(&def, &WorkflowInstance::new("run-1")).await;

    assert_eq!(report.status, RunStatus::Failed);
    let message = report.node_log("n").unwrap().error_message.clone().unwrap();
    assert_eq!(message, "Processor not found: ghost");
    assert!(report.summary.error_message.unwrap().contains("ghost"));
    assert_eq!(h.metrics.snapshot().results("ghost", "FAILED"), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_node_times_out() {
    let timeout = Duration::from_millis(100);
    let h = harness_with(ExecutorConfig {
        node_timeout: timeout,
        ..ExecutorConfig::default()
    });
    h.register("slow", MockProcessor::sleeping("slow", timeout * 2));

    let report = h
        .executor
        .run(&workflow(&["slow"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    let message = report.node_log("slow").unwrap().error_message.clone().unwrap();
    assert!(message.contains("Timeout"), "unexpected message: {message}");
    assert_eq!(h.metrics.snapshot().results("slow", "CANCELLED"), 1);
    assert!(h.cache.get(&idempotency_key("run-1", "slow")).await.is_none());
}

// ============================================================
// Idempotent resume
// ============================================================

#[tokio::test]
async fn execute_node_twice_invokes_processor_once() {
    let h = harness();
    let mock = h.register("etl", MockProcessor::succeeding("etl"));
    let node = WorkflowNode::new("load", "etl");
    let instance = WorkflowInstance::new("run-1");

    let first = h.executor.execute_node(&instance, &node).await;
    let second = h.executor.execute_node(&instance, &node).await;

    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(mock.call_count(), 1);

    // A different instance is a different run.
    h.executor
        .execute_node(&WorkflowInstance::new("run-2"), &node)
        .await;
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn failed_nodes_are_not_cached() {
    let h = harness();
    let mock = h.register("etl", MockProcessor::failing("etl", "nope"));
    let node = WorkflowNode::new("load", "etl");
    let instance = WorkflowInstance::new("run-1");

    h.executor.execute_node(&instance, &node).await;
    h.executor.execute_node(&instance, &node).await;

    assert_eq!(mock.call_count(), 2);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn rerun_of_same_instance_skips_completed_nodes() {
    let h = harness();
    let mocks: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| h.register(id, MockProcessor::succeeding(*id)))
        .collect();
    let instance = WorkflowInstance::new("run-1");

    assert!(h.executor.run(&diamond(), &instance).await.succeeded());
    let again = h.executor.run(&diamond(), &instance).await;

    assert!(again.succeeded());
    assert_eq!(again.node_logs.len(), 4);
    assert!(mocks.iter().all(|m| m.call_count() == 1));
}

#[tokio::test]
async fn resume_reruns_only_unfinished_nodes() {
    let h = harness();
    let a = h.register("a", MockProcessor::succeeding("a"));
    let b = h.register("b", MockProcessor::new("b", MockBehaviour::FailTimes(1)));
    let c = h.register("c", MockProcessor::succeeding("c"));
    let def = workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
    let instance = WorkflowInstance::new("run-1");

    let first = h.executor.run(&def, &instance).await;
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(c.call_count(), 0);

    let second = h.executor.run(&def, &instance).await;
    assert!(second.succeeded());
    assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 2, 1));
}

// ============================================================
// Graph validation
// ============================================================

#[tokio::test]
async fn cyclic_graph_is_rejected_before_dispatch() {
    let h = harness();
    let a = h.register("a", MockProcessor::succeeding("a"));
    h.register("b", MockProcessor::succeeding("b"));
    let def = workflow(&["a", "b"], &[("a", "b"), ("b", "a")]);

    let report = h.executor.run(&def, &WorkflowInstance::new("run-1")).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(report.failure, Some(RunFailure::GraphInvalid { .. })));
    assert!(report.waves.is_empty());
    assert_eq!(a.call_count(), 0);
}

#[tokio::test]
async fn cyclic_graph_without_validation_ends_incomplete() {
    let h = harness_with(ExecutorConfig {
        validate_graph: false,
        ..ExecutorConfig::default()
    });
    let root = h.register("root", MockProcessor::succeeding("root"));
    h.register("a", MockProcessor::succeeding("a"));
    h.register("b", MockProcessor::succeeding("b"));
    let def = workflow(&["root", "a", "b"], &[("a", "b"), ("b", "a")]);

    let report = h.executor.run(&def, &WorkflowInstance::new("run-1")).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(root.call_count(), 1);
    assert_eq!(
        report.failure,
        Some(RunFailure::Incomplete {
            never_run: vec!["a".into(), "b".into()]
        })
    );
}

#[tokio::test]
async fn dangling_edge_is_rejected() {
    let h = harness();
    h.register("a", MockProcessor::succeeding("a"));
    let def = workflow(&["a"], &[("a", "missing")]);

    let report = h.executor.run(&def, &WorkflowInstance::new("run-1")).await;

    assert!(matches!(
        report.failure,
        Some(RunFailure::GraphInvalid { ref message }) if message.contains("missing")
    ));
}

// ============================================================
// Retries, metrics, shutdown
// ============================================================

#[tokio::test(start_paused = true)]
async fn retry_policy_is_applied_per_processor() {
    let h = harness();
    let flaky = h.register(
        "flaky",
        MockProcessor::new("flaky", MockBehaviour::FailTimes(2))
            .with_retry_policy(RetryPolicy::fixed_delay(3, Duration::from_millis(50))),
    );

    let report = h
        .executor
        .run(&workflow(&["flaky"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert!(report.succeeded());
    assert_eq!(flaky.call_count(), 3);
    let seen = h.metrics.snapshot();
    let labels = [("processor_type", "flaky")];
    assert_eq!(seen.counter(TASK_EXECUTIONS, &labels), 3);
    assert_eq!(seen.counter(TASK_RETRIES, &labels), 2);
    assert_eq!(seen.results("flaky", "SUCCESS"), 1);
}

#[tokio::test]
async fn metrics_are_recorded_per_processor_type() {
    let h = harness();
    for id in ["a", "b", "c", "d"] {
        h.register(id, MockProcessor::succeeding(id));
    }

    h.executor.run(&diamond(), &WorkflowInstance::new("run-1")).await;

    let seen = h.metrics.snapshot();
    for id in ["a", "b", "c", "d"] {
        let labels = [("processor_type", id)];
        assert_eq!(seen.counter(TASK_EXECUTIONS, &labels), 1);
        assert_eq!(seen.results(id, "SUCCESS"), 1);
        assert_eq!(seen.histogram(TASK_LATENCY_SECONDS, &labels).len(), 1);
    }
}

#[tokio::test]
async fn runs_after_shutdown_fail_cleanly() {
    let h = harness();
    let solo = h.register("solo", MockProcessor::succeeding("solo"));

    assert!(h.executor.shutdown().await);
    let report = h
        .executor
        .run(&workflow(&["solo"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.node_log("solo").unwrap().error_message.as_deref(),
        Some("worker pool is shut down")
    );
    assert_eq!(solo.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_nodes_of_a_run_in_progress() {
    let h = harness();
    let slow = h.register("slow", MockProcessor::sleeping("slow", Duration::from_secs(3600)));

    let wf = workflow(&["slow"], &[]);
    let instance = WorkflowInstance::new("run-1");
    let (report, graceful) = tokio::join!(
        h.executor.run(&wf, &instance),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.executor.shutdown().await
        }
    );

    // The node outlived the five second grace period and was cancelled.
    assert!(!graceful);
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.node_log("slow").unwrap().error_message.as_deref(),
        Some("cancelled while sleeping")
    );
    assert_eq!(slow.cancelled_count(), 1);
    assert!(report.elapsed_ms >= 5000);
    assert!(report.elapsed_ms < 60_000);
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_wave_members_not_yet_awaited() {
    let h = harness_with(ExecutorConfig {
        node_timeout: Duration::from_millis(100),
        ..ExecutorConfig::default()
    });
    h.register("a", MockProcessor::sleeping("a", Duration::from_secs(10)));
    h.register("b", MockProcessor::sleeping("b", Duration::from_secs(10)));

    let report = h
        .executor
        .run(&workflow(&["a", "b"], &[]), &WorkflowInstance::new("run-1"))
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.node_logs.len(), 1);
    assert_eq!(
        report.failure,
        Some(RunFailure::NodeFailed {
            node_id: "a".into(),
            message: "Timeout after 100ms".into()
        })
    );
    assert!(report.node_log("b").is_none());
    assert!(report.elapsed_ms < 1000);
    assert_eq!(h.metrics.snapshot().results("a", "CANCELLED"), 1);
}
