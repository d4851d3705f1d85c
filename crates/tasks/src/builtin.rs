//! Built-in processors available to every registry through
//! [`register_builtins`].
//!
//! | type    | behaviour |
//! |---------|-----------|
//! | `noop`  | succeeds immediately |
//! | `echo`  | succeeds with the node parameters as output |
//! | `sleep` | waits `duration_ms` (default 0), stopping early on cancellation |
//! | `fail`  | fails with `message` (default "failed by configuration") |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{ProcessorRegistry, RegistryError, TaskContext, TaskError, TaskProcessor, TaskResult};

pub struct NoopProcessor;

#[async_trait]
impl TaskProcessor for NoopProcessor {
    async fn process(&self, _ctx: &TaskContext) -> Result<TaskResult, TaskError> {
        Ok(TaskResult::success())
    }
}

pub struct EchoProcessor;

#[async_trait]
impl TaskProcessor for EchoProcessor {
    async fn process(&self, ctx: &TaskContext) -> Result<TaskResult, TaskError> {
        Ok(TaskResult::success().with_output(ctx.parameters.clone()))
    }
}

pub struct SleepProcessor;

#[async_trait]
impl TaskProcessor for SleepProcessor {
    async fn process(&self, ctx: &TaskContext) -> Result<TaskResult, TaskError> {
        let duration = Duration::from_millis(ctx.param_u64("duration_ms").unwrap_or(0));
        debug!(task = %ctx.task_id, ?duration, "sleeping");

        tokio::select! {
            _ = ctx.cancellation().cancelled() => Ok(TaskResult::cancelled("sleep interrupted")),
            _ = tokio::time::sleep(duration) => Ok(TaskResult::success()),
        }
    }
}

pub struct FailProcessor;

#[async_trait]
impl TaskProcessor for FailProcessor {
    async fn process(&self, ctx: &TaskContext) -> Result<TaskResult, TaskError> {
        let message = ctx.param_str("message").unwrap_or("failed by configuration");
        Ok(TaskResult::failed(message))
    }
}

/// Register `noop`, `echo`, `sleep`, and `fail`.
///
/// # Errors
/// [`RegistryError::AlreadyRegistered`] if any of the names is taken.
pub fn register_builtins(registry: &ProcessorRegistry) -> Result<(), RegistryError> {
    registry.register("noop", Arc::new(NoopProcessor))?;
    registry.register("echo", Arc::new(EchoProcessor))?;
    registry.register("sleep", Arc::new(SleepProcessor))?;
    registry.register("fail", Arc::new(FailProcessor))?;
    Ok(())
}
