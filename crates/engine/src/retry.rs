//! Bounded retries around a single processor invocation.

use std::sync::Arc;

use tasks::{TaskContext, TaskError, TaskProcessor, TaskResult, TaskStatus};
use tracing::warn;

use crate::metrics::MetricsSink;

/// Runs a processor under its own [`RetryPolicy`](tasks::RetryPolicy).
///
/// A `Failed` result or a `Retryable` error earns another attempt while the
/// policy allows it. `Success`, `Cancelled`, and `Fatal` end the loop at once,
/// as does cancellation of the context.
#[derive(Clone)]
pub struct RetryTemplate {
    metrics: Arc<dyn MetricsSink>,
}

impl RetryTemplate {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    pub async fn execute(
        &self,
        processor_type: &str,
        processor: &dyn TaskProcessor,
        ctx: TaskContext,
    ) -> Result<TaskResult, TaskError> {
        let policy = processor.retry_policy();
        let mut ctx = ctx;
        let mut retries = 0u32;

        loop {
            self.metrics.record_execution(processor_type);
            let outcome = processor.process(&ctx).await;

            let reason = match &outcome {
                Ok(result) if result.status == TaskStatus::Failed => Some(
                    result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "task failed".to_owned()),
                ),
                Err(TaskError::Retryable(msg)) => Some(msg.clone()),
                _ => None,
            };

            let Some(reason) = reason.filter(|_| policy.can_retry(retries) && !ctx.is_cancelled())
            else {
                self.metrics.record_retries(processor_type, retries);
                return outcome;
            };

            retries += 1;
            let delay = policy.delay_for(retries);
            warn!(
                task = %ctx.task_id,
                processor = processor_type,
                attempt = retries,
                max_retries = policy.max_retries,
                ?delay,
                "retrying after failure: {reason}"
            );

            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    self.metrics.record_retries(processor_type, retries);
                    return Ok(TaskResult::cancelled("cancelled while waiting to retry"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            ctx = ctx.with_retry_count(retries);
        }
    }
}
