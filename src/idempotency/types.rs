//! Idempotency records and outcomes.

use super::policy::Policy;
use super::store::StoreError;
use crate::errors::ErrorDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// The winning claimer is executing.
    Pending,
    /// The operation completed; the value is served until expiry.
    Done,
    /// The operation failed; the failure is served until expiry.
    Failed,
}

/// A stored idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord<T> {
    /// Lifecycle state.
    pub status: RecordStatus,
    /// The success value, present iff `Done`.
    pub value: Option<T>,
    /// The failure, present iff `Failed`.
    pub error: Option<ErrorDescriptor>,
    /// Fingerprint of the input that claimed this key, if enabled.
    pub input_hash: Option<String>,
    /// When the claim was inserted.
    pub inserted_at: DateTime<Utc>,
    /// When the operation completed or failed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl<T> IdempotencyRecord<T> {
    /// Creates a fresh pending record.
    #[must_use]
    pub fn pending(now: DateTime<Utc>, input_hash: Option<String>) -> Self {
        Self {
            status: RecordStatus::Pending,
            value: None,
            error: None,
            input_hash,
            inserted_at: now,
            completed_at: None,
        }
    }

    fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        (now - self.inserted_at).to_std().ok()
    }

    /// Whether the record has outlived its retention under `policy`.
    ///
    /// `Pending` records expire with the pending lease; `Done` and
    /// `Failed` with their respective TTLs (`None` means kept
    /// indefinitely).
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &Policy) -> bool {
        let ttl = match self.status {
            RecordStatus::Pending => Some(policy.pending_lease),
            RecordStatus::Done => policy.success_ttl,
            RecordStatus::Failed => policy.failure_ttl,
        };
        match (ttl, self.age(now)) {
            (Some(ttl), Some(age)) => age >= ttl,
            _ => false,
        }
    }
}

/// A still-retained failure, surfaced to later callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    /// The recorded failure.
    pub error: ErrorDescriptor,
    /// When the failing claim was inserted.
    pub inserted_at: DateTime<Utc>,
}

/// Successful outcome of an idempotent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyResult<T> {
    /// The operation's value.
    pub value: T,
    /// Whether the value came from a prior completion.
    pub from_cache: bool,
    /// The idempotency key this run resolved to.
    pub key: String,
}

/// Errors from the idempotency executor.
#[derive(Debug, Error)]
pub enum IdempotencyError<E> {
    /// The key was reused with a different input fingerprint.
    #[error("idempotency key '{key}' reused with different input")]
    Conflict {
        /// The contested key.
        key: String,
    },

    /// Another caller holds the claim and the policy says fail fast.
    #[error("operation for key '{key}' is already in flight")]
    InFlight {
        /// The claimed key.
        key: String,
    },

    /// A prior attempt failed and its record is still retained.
    #[error("operation for key '{key}' previously failed: {error}")]
    PreviouslyFailed {
        /// The key.
        key: String,
        /// The recorded failure.
        error: ErrorDescriptor,
    },

    /// This caller won the claim and the operation failed.
    #[error("operation failed: {0}")]
    OperationFailed(E),

    /// The store backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Waiting for an in-flight operation outlasted the wait timeout.
    #[error("timed out waiting for in-flight operation on key '{key}'")]
    Timeout {
        /// The key being waited on.
        key: String,
    },

    /// A pending lease expired but another caller re-claimed first.
    #[error("pending lease for key '{key}' expired and was re-claimed elsewhere")]
    StaleLease {
        /// The key.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_records_expire_with_the_lease() {
        let policy = Policy::default().with_pending_lease(Duration::from_secs(10));
        let now = Utc::now();
        let record: IdempotencyRecord<String> = IdempotencyRecord::pending(now, None);

        assert!(!record.is_expired(now + chrono::Duration::seconds(5), &policy));
        assert!(record.is_expired(now + chrono::Duration::seconds(10), &policy));
    }

    #[test]
    fn done_records_without_ttl_never_expire() {
        let policy = Policy::default();
        let now = Utc::now();
        let mut record: IdempotencyRecord<String> = IdempotencyRecord::pending(now, None);
        record.status = RecordStatus::Done;
        record.value = Some("v".to_string());

        assert!(!record.is_expired(now + chrono::Duration::days(365), &policy));
    }

    #[test]
    fn clock_skew_does_not_expire_records() {
        let policy = Policy::default().with_pending_lease(Duration::from_secs(1));
        let now = Utc::now();
        let record: IdempotencyRecord<String> = IdempotencyRecord::pending(now, None);

        // A timestamp before insertion yields a negative age.
        assert!(!record.is_expired(now - chrono::Duration::seconds(60), &policy));
    }
}
