//! The idempotency store contract.

use super::policy::Policy;
use super::types::{FailedRecord, IdempotencyRecord};
use crate::errors::ErrorDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error from a store backend.
#[derive(Debug, Clone, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    /// What went wrong, in backend terms.
    pub message: String,
}

impl StoreError {
    /// Creates a store error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome<T> {
    /// This caller won; it must execute and then `complete` or `fail`.
    Claimed,
    /// A prior execution completed; serve its value.
    AlreadyDone(T),
    /// Another claim is pending and its lease is live.
    InFlight,
    /// The key is held by a record with a different input fingerprint.
    CollidedInputHash,
    /// A prior execution failed and the failure is still retained.
    Failed(FailedRecord),
}

/// Storage backend for idempotency records.
///
/// `claim` is the linearization point: concurrent claims on one key
/// must serialize, with exactly one caller seeing
/// [`ClaimOutcome::Claimed`]. Expired records must behave as absent —
/// backends may purge lazily on access or via
/// [`purge_expired`](Store::purge_expired). Implementations are shared
/// process-wide and called concurrently.
#[async_trait]
pub trait Store<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Atomically claims `key`, or reports what already holds it.
    async fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        input_hash: Option<&str>,
        policy: &Policy,
    ) -> Result<ClaimOutcome<T>, StoreError>;

    /// Unconditionally replaces whatever holds `key` with a fresh
    /// pending claim. Backs [`OnPending::Force`](super::OnPending::Force).
    async fn force_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        input_hash: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Marks the pending claim completed with `value`.
    async fn complete(&self, key: &str, value: T, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Marks the pending claim failed.
    async fn fail(
        &self,
        key: &str,
        error: ErrorDescriptor,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Reads the live record for `key`, treating expired records as
    /// absent.
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
        policy: &Policy,
    ) -> Result<Option<IdempotencyRecord<T>>, StoreError>;

    /// Removes expired records, returning how many were purged.
    async fn purge_expired(&self, now: DateTime<Utc>, policy: &Policy)
        -> Result<usize, StoreError>;
}
