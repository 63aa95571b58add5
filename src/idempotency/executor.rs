//! The idempotency executor and its builder.

use super::memory::MemoryStore;
use super::policy::{OnPending, Policy};
use super::store::{ClaimOutcome, Store, StoreError};
use super::types::{IdempotencyError, IdempotencyResult, RecordStatus};
use crate::action::Action;
use crate::errors::ErrorDescriptor;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

type KeyFn<I> = Arc<dyn Fn(&I) -> String + Send + Sync>;
type OperationFn<I, T, E> = Arc<dyn Fn(&I) -> Action<T, E> + Send + Sync>;
type FingerprintFn<I> = Arc<dyn Fn(&I) -> String + Send + Sync>;

/// Hex SHA-256 over the JSON encoding of `input`.
///
/// Inputs that fail to serialize degrade to a constant sentinel, which
/// trades collision detection for availability.
fn fingerprint_json<I: Serialize>(input: &I) -> String {
    match serde_json::to_vec(input) {
        Ok(bytes) => {
            let digest = Sha256::digest(&bytes);
            digest.iter().map(|b| format!("{b:02x}")).collect()
        }
        Err(_) => "unserializable-input".to_string(),
    }
}

/// Starts building an idempotency executor around `operation`.
pub fn idempotent<I, T, E>(
    operation: impl Fn(&I) -> Action<T, E> + Send + Sync + 'static,
) -> IdempotencyBuilder<I, T, E> {
    IdempotencyBuilder {
        operation: Arc::new(operation),
    }
}

/// Builder stage holding only the operation; [`key`] is the mandatory
/// next step.
///
/// [`key`]: IdempotencyBuilder::key
pub struct IdempotencyBuilder<I, T, E> {
    operation: OperationFn<I, T, E>,
}

impl<I, T, E> IdempotencyBuilder<I, T, E> {
    /// Sets the key function and unlocks the remaining configuration.
    #[must_use]
    pub fn key(
        self,
        key_fn: impl Fn(&I) -> String + Send + Sync + 'static,
    ) -> KeyedIdempotencyBuilder<I, T, E> {
        KeyedIdempotencyBuilder {
            operation: self.operation,
            key_fn: Arc::new(key_fn),
            store: None,
            policy: Policy::default(),
            fingerprint: None,
        }
    }
}

/// Builder with key function set; finish with [`build`].
///
/// [`build`]: KeyedIdempotencyBuilder::build
pub struct KeyedIdempotencyBuilder<I, T, E> {
    operation: OperationFn<I, T, E>,
    key_fn: KeyFn<I>,
    store: Option<Arc<dyn Store<T>>>,
    policy: Policy,
    fingerprint: Option<FingerprintFn<I>>,
}

impl<I, T, E> KeyedIdempotencyBuilder<I, T, E>
where
    T: Clone + Send + Sync + 'static,
{
    /// Sets the record store. Defaults to a fresh [`MemoryStore`].
    #[must_use]
    pub fn store(mut self, store: impl Store<T> + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Sets an already-shared record store.
    #[must_use]
    pub fn store_arc(mut self, store: Arc<dyn Store<T>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the policy.
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the input fingerprint function. The default is a
    /// SHA-256 over the input's JSON encoding.
    #[must_use]
    pub fn fingerprint_with(
        mut self,
        f: impl Fn(&I) -> String + Send + Sync + 'static,
    ) -> Self {
        self.fingerprint = Some(Arc::new(f));
        self
    }

    /// Builds the immutable executor.
    #[must_use]
    pub fn build(self) -> IdempotencyExecutor<I, T, E>
    where
        I: Serialize + 'static,
    {
        IdempotencyExecutor {
            operation: self.operation,
            key_fn: self.key_fn,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::<T>::new())),
            policy: self.policy,
            fingerprint: self
                .fingerprint
                .unwrap_or_else(|| Arc::new(fingerprint_json::<I>)),
        }
    }
}

/// Spawns `store.fail(key, cancelled)` if the executing caller's
/// future is dropped before the outcome is recorded, so waiting
/// callers unblock instead of riding out the pending lease.
struct ClaimGuard<T>
where
    T: Send + Sync + 'static,
{
    store: Arc<dyn Store<T>>,
    key: String,
    armed: bool,
}

impl<T> ClaimGuard<T>
where
    T: Send + Sync + 'static,
{
    fn new(store: Arc<dyn Store<T>>, key: String) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T> Drop for ClaimGuard<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = Arc::clone(&self.store);
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                if let Err(e) = store
                    .fail(&key, ErrorDescriptor::cancelled(), Utc::now())
                    .await
                {
                    warn!(key, error = %e, "failed to record cancellation");
                }
            });
        }
    }
}

/// Exactly-once executor for a keyed operation.
///
/// Immutable after build; cheap to clone and share across tasks.
pub struct IdempotencyExecutor<I, T, E> {
    operation: OperationFn<I, T, E>,
    key_fn: KeyFn<I>,
    store: Arc<dyn Store<T>>,
    policy: Policy,
    fingerprint: FingerprintFn<I>,
}

impl<I, T, E> Clone for IdempotencyExecutor<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            key_fn: Arc::clone(&self.key_fn),
            store: Arc::clone(&self.store),
            policy: self.policy,
            fingerprint: Arc::clone(&self.fingerprint),
        }
    }
}

impl<I, T, E> IdempotencyExecutor<I, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::fmt::Display + Send + 'static,
{
    /// Runs the operation for `input` with exactly-once semantics on
    /// its key.
    pub async fn run(&self, input: &I) -> Result<IdempotencyResult<T>, IdempotencyError<E>> {
        let key = (self.key_fn)(input);
        let input_hash = if self.policy.input_fingerprint {
            Some((self.fingerprint)(input))
        } else {
            None
        };

        debug!(key, "claiming idempotency key");
        match self
            .store
            .claim(&key, Utc::now(), input_hash.as_deref(), &self.policy)
            .await?
        {
            ClaimOutcome::Claimed => self.execute(input, key).await,
            ClaimOutcome::AlreadyDone(value) => Ok(IdempotencyResult {
                value,
                from_cache: true,
                key,
            }),
            ClaimOutcome::CollidedInputHash => Err(IdempotencyError::Conflict { key }),
            ClaimOutcome::Failed(record) => Err(IdempotencyError::PreviouslyFailed {
                key,
                error: record.error,
            }),
            ClaimOutcome::InFlight => match self.policy.on_pending {
                OnPending::FailFast => Err(IdempotencyError::InFlight { key }),
                OnPending::Force => {
                    debug!(key, "forcing over in-flight claim");
                    self.store
                        .force_claim(&key, Utc::now(), input_hash.as_deref())
                        .await?;
                    self.execute(input, key).await
                }
                OnPending::Wait => self.wait_for_outcome(input, key, input_hash).await,
            },
        }
    }

    /// Runs the operation as the claim winner and records the outcome.
    async fn execute(
        &self,
        input: &I,
        key: String,
    ) -> Result<IdempotencyResult<T>, IdempotencyError<E>> {
        let mut guard = ClaimGuard::new(Arc::clone(&self.store), key.clone());
        let result = (self.operation)(input).run().await;
        guard.disarm();

        match result {
            Ok(value) => {
                self.store
                    .complete(&key, value.clone(), Utc::now())
                    .await?;
                Ok(IdempotencyResult {
                    value,
                    from_cache: false,
                    key,
                })
            }
            Err(e) => {
                self.store
                    .fail(&key, ErrorDescriptor::operation(e.to_string()), Utc::now())
                    .await?;
                Err(IdempotencyError::OperationFailed(e))
            }
        }
    }

    /// Polls the store until the in-flight record resolves, the lease
    /// lapses, or the wait timeout elapses.
    ///
    /// A lapsed lease is re-claimed; if someone else re-claimed first,
    /// the caller gets [`IdempotencyError::StaleLease`].
    async fn wait_for_outcome(
        &self,
        input: &I,
        key: String,
        input_hash: Option<String>,
    ) -> Result<IdempotencyResult<T>, IdempotencyError<E>> {
        let deadline = tokio::time::Instant::now() + self.policy.wait_timeout;

        loop {
            match self.store.get(&key, Utc::now(), &self.policy).await? {
                Some(record) => match record.status {
                    RecordStatus::Done => {
                        return match record.value {
                            Some(value) => Ok(IdempotencyResult {
                                value,
                                from_cache: true,
                                key,
                            }),
                            None => Err(StoreError::new(format!(
                                "record for '{key}' is Done without a value"
                            ))
                            .into()),
                        };
                    }
                    RecordStatus::Failed => {
                        let error = record
                            .error
                            .unwrap_or_else(|| ErrorDescriptor::operation("unknown failure"));
                        return Err(IdempotencyError::PreviouslyFailed { key, error });
                    }
                    RecordStatus::Pending => {}
                },
                None => {
                    debug!(key, "pending lease lapsed, re-claiming");
                    return match self
                        .store
                        .claim(&key, Utc::now(), input_hash.as_deref(), &self.policy)
                        .await?
                    {
                        ClaimOutcome::Claimed => self.execute(input, key).await,
                        ClaimOutcome::AlreadyDone(value) => Ok(IdempotencyResult {
                            value,
                            from_cache: true,
                            key,
                        }),
                        ClaimOutcome::CollidedInputHash => {
                            Err(IdempotencyError::Conflict { key })
                        }
                        ClaimOutcome::Failed(record) => Err(IdempotencyError::PreviouslyFailed {
                            key,
                            error: record.error,
                        }),
                        ClaimOutcome::InFlight => Err(IdempotencyError::StaleLease { key }),
                    };
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(IdempotencyError::Timeout { key });
            }
            tokio::time::sleep(self.policy.wait_poll_interval).await;
        }
    }
}
