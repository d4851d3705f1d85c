//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
///
/// Execution errors never escape [`WorkflowExecutor::run`]; they are rendered
/// into the `error_message` of a FAILED node log.
///
/// [`WorkflowExecutor::run`]: crate::WorkflowExecutor::run
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node is stored under a key different from its own ID.
    #[error("node stored under key '{key}' has id '{node_id}'")]
    NodeIdMismatch { key: String, node_id: String },

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle through: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    // ------ Execution errors ------

    /// No processor is registered for the node's `processor_type`.
    #[error("Processor not found: {0}")]
    ProcessorNotFound(String),

    /// The node did not finish within the executor's node timeout.
    #[error("Timeout after {0:?}")]
    NodeTimeout(Duration),

    /// The processor returned an error.
    #[error(transparent)]
    Task(#[from] tasks::TaskError),

    /// The processor panicked.
    #[error("processor panicked: {0}")]
    NodePanicked(String),

    /// The node's task was cancelled before it produced a result.
    #[error("node execution cancelled")]
    NodeCancelled,

    /// The worker pool no longer accepts work.
    #[error("worker pool is shut down")]
    PoolShutdown,

    /// An executor was built outside of a Tokio runtime.
    #[error("no Tokio runtime available to host the worker pool")]
    NoRuntime,
}
