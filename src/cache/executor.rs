//! Cache builder and executor.

use super::tier::{Tier, TierError};
use crate::action::Action;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

type KeyFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;
type FetchFn<K, T, E> = Arc<dyn Fn(&K) -> Action<T, E> + Send + Sync>;
type TierErrorHook = Arc<dyn Fn(&str, &TierError) + Send + Sync>;

/// Where a cache read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Served from the tier at this index (0 is the shallowest).
    Tier(usize),
    /// Served by the fetch function after a full miss.
    Fetch,
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tier(i) => write!(f, "tier-{i}"),
            Self::Fetch => write!(f, "fetch"),
        }
    }
}

/// A cache read result with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult<T> {
    /// The value.
    pub value: T,
    /// Which layer satisfied the read.
    pub source: CacheSource,
}

/// Error from a cache operation.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// Every tier missed and the fetch function failed.
    #[error("fetch failed: {0}")]
    Fetch(E),

    /// A tier backend failed in a way that breaks the operation's
    /// contract (e.g. an invalidation that cannot be confirmed).
    #[error(transparent)]
    Tier(TierError),
}

/// Builder for a [`CacheExecutor`]. Obtained from [`cache`].
pub struct CacheBuilder<K, T, E> {
    key_fn: KeyFn<K>,
    fetch: FetchFn<K, T, E>,
    tiers: Vec<Arc<dyn Tier<T>>>,
    on_tier_error: Option<TierErrorHook>,
}

impl<K, T, E> CacheBuilder<K, T, E>
where
    T: Clone + Send + Sync + 'static,
{
    /// Appends a tier. Order matters: the first tier added is probed
    /// first.
    #[must_use]
    pub fn tier(mut self, tier: impl Tier<T> + 'static) -> Self {
        self.tiers.push(Arc::new(tier));
        self
    }

    /// Appends an already-shared tier.
    #[must_use]
    pub fn tier_arc(mut self, tier: Arc<dyn Tier<T>>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Installs a hook invoked with the tier name whenever a tier call
    /// fails in a best-effort position (probe skips, refill writes).
    #[must_use]
    pub fn on_tier_error(mut self, hook: impl Fn(&str, &TierError) + Send + Sync + 'static) -> Self {
        self.on_tier_error = Some(Arc::new(hook));
        self
    }

    /// Builds the immutable executor.
    #[must_use]
    pub fn build(self) -> CacheExecutor<K, T, E> {
        CacheExecutor {
            key_fn: self.key_fn,
            fetch: self.fetch,
            tiers: self.tiers,
            on_tier_error: self.on_tier_error,
        }
    }
}

/// Creates a cache builder from a key function and a fetch function.
pub fn cache<K, T, E>(
    key_fn: impl Fn(&K) -> String + Send + Sync + 'static,
    fetch: impl Fn(&K) -> Action<T, E> + Send + Sync + 'static,
) -> CacheBuilder<K, T, E>
where
    T: Clone + Send + Sync + 'static,
{
    CacheBuilder {
        key_fn: Arc::new(key_fn),
        fetch: Arc::new(fetch),
        tiers: Vec::new(),
        on_tier_error: None,
    }
}

/// An immutable tiered cache.
///
/// Reads are read-through: tiers are probed in order and a full miss
/// invokes the fetch function, whose value is then written to every
/// tier. A hit at a deeper tier refills the shallower tiers.
pub struct CacheExecutor<K, T, E> {
    key_fn: KeyFn<K>,
    fetch: FetchFn<K, T, E>,
    tiers: Vec<Arc<dyn Tier<T>>>,
    on_tier_error: Option<TierErrorHook>,
}

impl<K, T, E> CacheExecutor<K, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    fn report_tier_error(&self, tier_name: &str, error: &TierError) {
        warn!(tier = tier_name, %error, "tier call failed");
        if let Some(hook) = &self.on_tier_error {
            hook(tier_name, error);
        }
    }

    /// Writes `value` to the given tiers concurrently, best-effort.
    async fn write_tiers(&self, indices: impl Iterator<Item = usize>, key: &str, value: &T) {
        let mut writes = JoinSet::new();
        for i in indices {
            let tier = Arc::clone(&self.tiers[i]);
            let key = key.to_string();
            let value = value.clone();
            writes.spawn(async move {
                let outcome = tier.set(&key, value).await;
                (i, outcome)
            });
        }

        while let Some(joined) = writes.join_next().await {
            if let Ok((i, Err(e))) = joined {
                self.report_tier_error(self.tiers[i].name(), &e);
            }
        }
    }

    /// Reads `key`, probing tiers shallow to deep before fetching.
    pub async fn get(&self, key: &K) -> Result<CacheResult<T>, CacheError<E>> {
        let cache_key = (self.key_fn)(key);

        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.get(&cache_key).await {
                Ok(Some(value)) => {
                    debug!(key = %cache_key, tier = i, "cache hit");
                    if i > 0 {
                        self.write_tiers(0..i, &cache_key, &value).await;
                    }
                    return Ok(CacheResult {
                        value,
                        source: CacheSource::Tier(i),
                    });
                }
                Ok(None) => {}
                Err(e) => self.report_tier_error(tier.name(), &e),
            }
        }

        debug!(key = %cache_key, "cache miss, fetching");
        match (self.fetch)(key).run().await {
            Ok(value) => {
                self.write_tiers(0..self.tiers.len(), &cache_key, &value)
                    .await;
                Ok(CacheResult {
                    value,
                    source: CacheSource::Fetch,
                })
            }
            Err(e) => Err(CacheError::Fetch(e)),
        }
    }

    /// Removes `key` from every tier.
    ///
    /// `Ok(true)` if any tier held the key. A tier failure is an error
    /// here: the all-tiers-miss postcondition cannot be confirmed.
    pub async fn invalidate(&self, key: &K) -> Result<bool, CacheError<E>> {
        let cache_key = (self.key_fn)(key);
        let mut any = false;
        let mut failure = None;

        for tier in &self.tiers {
            match tier.invalidate(&cache_key).await {
                Ok(existed) => any |= existed,
                Err(e) => {
                    self.report_tier_error(tier.name(), &e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(CacheError::Tier(e)),
            None => Ok(any),
        }
    }

    /// Removes every key matching the wildcard pattern from every tier,
    /// returning the total number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError<E>> {
        let mut total = 0;
        let mut failure = None;

        for tier in &self.tiers {
            match tier.invalidate_pattern(pattern).await {
                Ok(count) => total += count,
                Err(e) => {
                    self.report_tier_error(tier.name(), &e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(CacheError::Tier(e)),
            None => Ok(total),
        }
    }
}
