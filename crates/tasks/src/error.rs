//! Task-level error types.

use thiserror::Error;

/// Errors returned by a processor's `process` method.
///
/// The retry template uses the variant to decide whether another attempt is
/// allowed:
/// - `Retryable` - retried while the processor's [`RetryPolicy`] permits.
/// - `Fatal`     - the node fails immediately.
///
/// [`RetryPolicy`]: crate::RetryPolicy
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; another attempt may succeed.
    #[error("retryable task error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal task error: {0}")]
    Fatal(String),
}

/// Errors raised while registering processors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("processor name cannot be empty")]
    EmptyName,

    #[error("processor name '{0}' contains invalid characters (allowed: letters, digits, '_', '-', '.')")]
    InvalidName(String),

    #[error("processor version '{0}' contains invalid characters")]
    InvalidVersion(String),

    #[error("processor '{name}' version '{version}' is already registered")]
    AlreadyRegistered { name: String, version: String },
}
