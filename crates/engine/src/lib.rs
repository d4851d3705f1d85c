//! `engine` crate: workflow models, DAG validation, the idempotent cache,
//! metrics, and the wave-parallel execution engine.

pub mod cache;
pub mod dag;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod report;
pub mod retry;

pub use cache::{idempotency_key, IdempotentCache, InMemoryIdempotentCache};
pub use dag::validate_dag;
pub use error::EngineError;
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use crate::metrics::{MetricsCollector, MetricsSink, NoopMetrics};
pub use models::{
    LogStatus, WorkflowDefinition, WorkflowEdge, WorkflowExecutionLog, WorkflowInstance,
    WorkflowNode, WORKFLOW_LOG_ID,
};
pub use pool::WorkerPool;
pub use report::{RunFailure, RunReport, RunStatus};
pub use retry::RetryTemplate;

#[cfg(test)]
mod executor_tests;
