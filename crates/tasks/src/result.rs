//! Outcome of one processor invocation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal state of a single task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
    /// Interrupted before finishing (timeout or sibling failure).
    Cancelled,
}

/// What a processor produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub output: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

impl TaskResult {
    fn with_status(status: TaskStatus, error_message: Option<String>) -> Self {
        Self {
            status,
            error_message,
            output: None,
            started_at: None,
            duration: None,
        }
    }

    pub fn success() -> Self {
        Self::with_status(TaskStatus::Success, None)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(TaskStatus::Failed, Some(message.into()))
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_status(TaskStatus::Cancelled, Some(message.into()))
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Fill in timing fields the processor left empty.
    pub fn timed(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at.get_or_insert(started_at);
        self.duration.get_or_insert(duration);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
