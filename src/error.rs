//! Error types.

use crate::operation::OperationKey;
use std::error::Error;
use std::sync::Arc;

/// Boxed error returned by generator functions.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors reported by the registry and its views.
///
/// `CacheError` is cheap to clone: a single generation failure is delivered to
/// the producing caller and to every caller that joined the same in-flight
/// generation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// An operation was requested with a key type or value kind that conflicts
    /// with its existing registration.
    #[error("conflicting registration for {operation}: {reason}")]
    Configuration {
        /// The operation whose registration conflicts.
        operation: OperationKey,
        /// What conflicted.
        reason: String,
    },

    /// A lifetime failed validation after merge and resolution.
    #[error("invalid lifetime: {reason}")]
    Policy {
        /// Why the lifetime was rejected.
        reason: String,
    },

    /// The generator returned an error.
    #[error("generator for {operation} failed: {source}")]
    Generation {
        /// The operation whose generator failed.
        operation: OperationKey,
        /// The generator's error.
        #[source]
        source: Arc<dyn Error + Send + Sync + 'static>,
    },

    /// The generator panicked while producing a value.
    #[error("generator for {operation} panicked")]
    GeneratorPanicked {
        /// The operation whose generator panicked.
        operation: OperationKey,
    },
}

impl CacheError {
    pub(crate) fn generation(operation: &OperationKey, source: BoxError) -> Self {
        CacheError::Generation {
            operation: operation.clone(),
            source: Arc::from(source),
        }
    }

    pub(crate) fn policy(reason: impl Into<String>) -> Self {
        CacheError::Policy {
            reason: reason.into(),
        }
    }
}
