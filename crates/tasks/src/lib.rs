//! `tasks` crate: the `TaskProcessor` trait, task value types, the processor
//! registry, and built-in processors.
//!
//! Every task type a workflow node can reference must implement
//! [`TaskProcessor`]. The engine crate resolves implementations through a
//! [`ProcessorRegistry`] and dispatches execution through the trait object.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod result;
pub mod retry;
pub mod traits;

pub use error::{RegistryError, TaskError};
pub use registry::{ProcessorEntry, ProcessorRegistry, RegistryStats};
pub use result::{TaskResult, TaskStatus};
pub use retry::{Backoff, RetryPolicy};
pub use traits::{TaskContext, TaskProcessor};
