//! Shared error plumbing.
//!
//! Each engine owns its error types; this module holds what they share:
//! the boxed dynamic error used at type-erasure seams, the serializable
//! [`ErrorDescriptor`] stored by idempotency backends, and the
//! [`CrosscutError`] umbrella for callers that funnel several engines
//! into one error channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed dynamic error used wherever the concrete error type is erased
/// (node constructors, compensators, tier backends).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A serializable description of an error, used where the original error
/// value cannot be kept (idempotency stores persist these).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ErrorDescriptor {
    /// Short machine-readable kind, e.g. `"operation"` or `"cancelled"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorDescriptor {
    /// Creates a descriptor from a kind and message.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Descriptor for an operation error.
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::new("operation", message)
    }

    /// Descriptor for a cancelled execution.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new("cancelled", "execution cancelled before completion")
    }

    /// Whether this descriptor records a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == "cancelled"
    }
}

/// Umbrella error over every engine.
///
/// Engines return their own error types; this enum exists for
/// application code that mixes engines behind a single `?`.
#[derive(Debug, Error)]
pub enum CrosscutError {
    /// A graph plan or resolution error.
    #[error(transparent)]
    Graph(#[from] crate::graph::GraphError),

    /// A saga failed and rolled back.
    #[error("{0}")]
    Saga(crate::saga::SagaError<BoxError>),

    /// A cache fetch failed.
    #[error("{0}")]
    Cache(crate::cache::CacheError<BoxError>),

    /// An idempotent operation failed.
    #[error("{0}")]
    Idempotency(crate::idempotency::IdempotencyError<BoxError>),

    /// An action timed out.
    #[error("operation timed out")]
    Timeout,

    /// Execution was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_display() {
        let d = ErrorDescriptor::operation("card declined");
        assert_eq!(d.to_string(), "operation: card declined");
        assert!(!d.is_cancelled());
        assert!(ErrorDescriptor::cancelled().is_cancelled());
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let d = ErrorDescriptor::new("store", "row locked");
        let json = serde_json::to_string(&d).unwrap();
        let back: ErrorDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
