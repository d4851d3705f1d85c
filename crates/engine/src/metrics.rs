//! Per-processor-type execution metrics.
//!
//! [`MetricsCollector`] emits through the `metrics` facade, so measurements
//! land in whichever recorder the host process installs (Prometheus exporter,
//! `metrics-util` debugging recorder, ...). Without a recorder every call is
//! a no-op.

use std::time::Duration;

use tasks::{TaskResult, TaskStatus};
use tracing::trace;

/// Histogram of processor wall-clock latency, in seconds.
pub const TASK_LATENCY_SECONDS: &str = "dagflow.task.latency_seconds";
/// Counter of task outcomes, labelled by `status`.
pub const TASK_RESULTS: &str = "dagflow.task.results";
/// Counter of processor attempts, retries included.
pub const TASK_EXECUTIONS: &str = "dagflow.task.executions";
/// Counter of retries spent across nodes.
pub const TASK_RETRIES: &str = "dagflow.task.retries";

/// Receiver of execution measurements.
///
/// Calls are fire-and-forget: implementations must not panic and must be
/// safe to call from many tasks at once.
pub trait MetricsSink: Send + Sync {
    fn record_latency(&self, processor_type: &str, duration: Duration);

    fn record_result(&self, processor_type: &str, result: &TaskResult);

    /// One processor attempt started.
    fn record_execution(&self, _processor_type: &str) {}

    /// Retries spent on one node (0 when the first attempt was final).
    fn record_retries(&self, _processor_type: &str, _retries: u32) {}
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Success => "SUCCESS",
        TaskStatus::Failed => "FAILED",
        TaskStatus::Cancelled => "CANCELLED",
    }
}

/// [`MetricsSink`] backed by the `metrics` crate, labelled by processor type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Register units and help text with the installed recorder.
    pub fn describe() {
        metrics::describe_histogram!(
            TASK_LATENCY_SECONDS,
            metrics::Unit::Seconds,
            "Processor latency per processor type"
        );
        metrics::describe_counter!(TASK_RESULTS, "Task outcomes per processor type and status");
        metrics::describe_counter!(TASK_EXECUTIONS, "Processor attempts per processor type");
        metrics::describe_counter!(TASK_RETRIES, "Retries per processor type");
    }
}

impl MetricsSink for MetricsCollector {
    fn record_latency(&self, processor_type: &str, duration: Duration) {
        trace!(processor = processor_type, ?duration, "latency");
        metrics::histogram!(TASK_LATENCY_SECONDS, "processor_type" => processor_type.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_result(&self, processor_type: &str, result: &TaskResult) {
        metrics::counter!(
            TASK_RESULTS,
            "processor_type" => processor_type.to_owned(),
            "status" => status_label(result.status)
        )
        .increment(1);
    }

    fn record_execution(&self, processor_type: &str) {
        metrics::counter!(TASK_EXECUTIONS, "processor_type" => processor_type.to_owned())
            .increment(1);
    }

    fn record_retries(&self, processor_type: &str, retries: u32) {
        if retries > 0 {
            metrics::counter!(TASK_RETRIES, "processor_type" => processor_type.to_owned())
                .increment(u64::from(retries));
        }
    }
}

/// A sink that drops everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_latency(&self, _processor_type: &str, _duration: Duration) {}

    fn record_result(&self, _processor_type: &str, _result: &TaskResult) {}
}
