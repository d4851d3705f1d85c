//! Structured outcome of a workflow run.

use serde::Serialize;

use crate::models::WorkflowExecutionLog;

/// Lifecycle of a run. `Running` only exists while `run` is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Why a run ended FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// A node returned a non-success result, timed out, or panicked.
    NodeFailed { node_id: String, message: String },
    /// Validation rejected the graph before anything was dispatched.
    GraphInvalid { message: String },
    /// No node failed, but some never became ready (cycle or dangling edge
    /// with validation disabled).
    Incomplete { never_run: Vec<String> },
}

/// Everything a caller may want to know about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub instance_id: String,
    pub status: RunStatus,
    /// Synthetic log with id `"workflow"`.
    pub summary: WorkflowExecutionLog,
    /// Per-node logs in the order they were recorded.
    pub node_logs: Vec<WorkflowExecutionLog>,
    /// Node ids per dispatched wave.
    pub waves: Vec<Vec<String>>,
    pub failure: Option<RunFailure>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn node_log(&self, node_id: &str) -> Option<&WorkflowExecutionLog> {
        self.node_logs.iter().find(|log| log.id == node_id)
    }
}
