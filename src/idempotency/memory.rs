//! In-process store, for single-instance services and tests.

use super::policy::Policy;
use super::store::{ClaimOutcome, Store, StoreError};
use super::types::{FailedRecord, IdempotencyRecord, RecordStatus};
use crate::errors::ErrorDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A `DashMap`-backed idempotency store.
///
/// Claims are atomic per key through the map's entry API. Records do
/// not survive a restart and are not shared across processes; use a
/// database-backed [`Store`] for that.
#[derive(Default)]
pub struct MemoryStore<T> {
    records: DashMap<String, IdempotencyRecord<T>>,
}

impl<T> MemoryStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of live records, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        input_hash: Option<&str>,
        policy: &Policy,
    ) -> Result<ClaimOutcome<T>, StoreError> {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(IdempotencyRecord::pending(
                    now,
                    input_hash.map(str::to_string),
                ));
                Ok(ClaimOutcome::Claimed)
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get();

                if record.is_expired(now, policy) {
                    occupied.insert(IdempotencyRecord::pending(
                        now,
                        input_hash.map(str::to_string),
                    ));
                    return Ok(ClaimOutcome::Claimed);
                }

                if let (Some(requested), Some(stored)) = (input_hash, record.input_hash.as_deref())
                {
                    if requested != stored {
                        return Ok(ClaimOutcome::CollidedInputHash);
                    }
                }

                match record.status {
                    RecordStatus::Pending => Ok(ClaimOutcome::InFlight),
                    RecordStatus::Done => match record.value.clone() {
                        Some(value) => Ok(ClaimOutcome::AlreadyDone(value)),
                        None => Err(StoreError::new(format!(
                            "record for '{key}' is Done without a value"
                        ))),
                    },
                    RecordStatus::Failed => match record.error.clone() {
                        Some(error) => Ok(ClaimOutcome::Failed(FailedRecord {
                            error,
                            inserted_at: record.inserted_at,
                        })),
                        None => Err(StoreError::new(format!(
                            "record for '{key}' is Failed without an error"
                        ))),
                    },
                }
            }
        }
    }

    async fn force_claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
        input_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        self.records.insert(
            key.to_string(),
            IdempotencyRecord::pending(now, input_hash.map(str::to_string)),
        );
        Ok(())
    }

    async fn complete(&self, key: &str, value: T, now: DateTime<Utc>) -> Result<(), StoreError> {
        match self.records.get_mut(key) {
            Some(mut record) => {
                record.status = RecordStatus::Done;
                record.value = Some(value);
                record.error = None;
                record.completed_at = Some(now);
                Ok(())
            }
            None => Err(StoreError::new(format!(
                "no pending record to complete for '{key}'"
            ))),
        }
    }

    async fn fail(
        &self,
        key: &str,
        error: ErrorDescriptor,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.records.get_mut(key) {
            Some(mut record) => {
                record.status = RecordStatus::Failed;
                record.value = None;
                record.error = Some(error);
                record.completed_at = Some(now);
                Ok(())
            }
            None => Err(StoreError::new(format!(
                "no pending record to fail for '{key}'"
            ))),
        }
    }

    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
        policy: &Policy,
    ) -> Result<Option<IdempotencyRecord<T>>, StoreError> {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(None),
            Entry::Occupied(occupied) => {
                if occupied.get().is_expired(now, policy) {
                    occupied.remove();
                    Ok(None)
                } else {
                    Ok(Some(occupied.get().clone()))
                }
            }
        }
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        policy: &Policy,
    ) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.is_expired(now, policy));
        Ok(before - self.records.len())
    }
}
