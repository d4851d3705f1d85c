//! The `TaskProcessor` trait and the `TaskContext` handed to every invocation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{RetryPolicy, TaskError, TaskResult};

/// Immutable input for one processor invocation.
///
/// Built by the engine per node execution. Defined here (in the tasks crate)
/// so both the engine and processor implementations can import it without a
/// circular dependency.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Logical task name; the engine uses the node id.
    pub task_id: String,
    /// Run the task belongs to.
    pub instance_id: String,
    /// `"{instance_id}:{task_id}"` when the engine deduplicates the task.
    pub idempotent_key: Option<String>,
    /// Node configuration forwarded from the workflow definition.
    pub parameters: Value,
    pub labels: BTreeMap<String, String>,
    /// Number of attempts made before this one.
    pub retry_count: u32,
    /// Time budget the engine enforces on the whole node, if known.
    pub timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Create a context with empty parameters and a fresh cancellation token.
    pub fn new(task_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            instance_id: instance_id.into(),
            idempotent_key: None,
            parameters: Value::Null,
            labels: BTreeMap::new(),
            retry_count: 0,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_idempotent_key(mut self, key: impl Into<String>) -> Self {
        self.idempotent_key = Some(key.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Replace the cancellation token, usually with a child of a run-wide one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token signalled when the engine no longer wants this task's result.
    ///
    /// Cancellation is cooperative: long-running processors should select on
    /// `cancellation().cancelled()` or poll `is_cancelled()`.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Look up an unsigned integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }
}

/// The core processor trait.
///
/// Every task type bound to a workflow node through its `processor_type`
/// implements this.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Run the task once.
    ///
    /// Returning a non-success [`TaskResult`] and returning `Err` both fail
    /// the node; the difference only matters to the retry policy.
    async fn process(&self, ctx: &TaskContext) -> Result<TaskResult, TaskError>;

    /// Retry behaviour for this processor. No retries unless overridden.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::no_retry()
    }
}
