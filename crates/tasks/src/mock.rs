//! `MockProcessor`: a test double for `TaskProcessor`.
//!
//! Useful in unit and integration tests where a real processor is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{RetryPolicy, TaskContext, TaskError, TaskProcessor, TaskResult};

/// Behaviour injected into `MockProcessor` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Succeed with `{ "processor": name }` merged with the given object.
    Succeed(Value),
    /// Return a `Failed` result.
    FailResult(String),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with `Failed` results for the first `n` calls, then succeed.
    FailTimes(usize),
    /// Sleep, then succeed. Returns `Cancelled` if the context is cancelled first.
    Sleep(Duration),
    /// Panic inside `process`.
    Panic(String),
}

/// A mock processor that records every call it receives and returns a
/// programmer-specified result.
pub struct MockProcessor {
    /// Label used in test assertions and outputs.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Task ids seen by this processor (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicUsize>,
    retry_policy: RetryPolicy,
}

impl MockProcessor {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(AtomicUsize::new(0)),
            retry_policy: RetryPolicy::no_retry(),
        }
    }

    /// A mock that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Succeed(json!({})))
    }

    /// A mock that always succeeds with the given value merged into its output.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, MockBehaviour::Succeed(value))
    }

    /// A mock that always returns a `Failed` result.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailResult(msg.into()))
    }

    /// A mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// A mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// A mock that sleeps for `duration` before succeeding.
    pub fn sleeping(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, MockBehaviour::Sleep(duration))
    }

    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Panic(msg.into()))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Number of times this processor has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of invocations that observed cancellation while sleeping.
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for MockProcessor {
    async fn process(&self, ctx: &TaskContext) -> Result<TaskResult, TaskError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(ctx.task_id.clone());
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::Succeed(v) => {
                // Merge the configured value with the processor's own name so
                // tests can tell which processor produced an output.
                let mut out = json!({ "processor": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(TaskResult::success().with_output(out))
            }
            MockBehaviour::FailResult(msg) => Ok(TaskResult::failed(msg.clone())),
            MockBehaviour::FailRetryable(msg) => Err(TaskError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(TaskError::Fatal(msg.clone())),
            MockBehaviour::FailTimes(n) if call_number <= *n => {
                Ok(TaskResult::failed(format!("attempt {call_number} failed")))
            }
            MockBehaviour::FailTimes(_) => Ok(TaskResult::success()),
            MockBehaviour::Sleep(duration) => {
                tokio::select! {
                    _ = ctx.cancellation().cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        Ok(TaskResult::cancelled("cancelled while sleeping"))
                    }
                    _ = tokio::time::sleep(*duration) => Ok(TaskResult::success()),
                }
            }
            MockBehaviour::Panic(msg) => panic!("{}", msg),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }
}
