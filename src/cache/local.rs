//! In-process LRU tier.

use super::tier::{wildcard_match, Tier, TierError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

struct LruState<T> {
    map: HashMap<String, T>,
    order: VecDeque<String>,
}

/// An in-memory LRU cache tier bounded by entry count.
///
/// Usually the shallowest tier in a stack. Shared across tasks behind
/// an `Arc`; all state sits under one mutex, which is fine for an
/// in-process tier where operations are memory-only.
pub struct LocalTier<T> {
    name: String,
    max_size: usize,
    state: Mutex<LruState<T>>,
}

impl<T> LocalTier<T> {
    /// Creates a tier holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self::named("local", max_size)
    }

    /// Creates a named tier, for stacks with several local tiers.
    #[must_use]
    pub fn named(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            max_size: max_size.max(1),
            state: Mutex::new(LruState {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    /// Whether the tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
    order.push_back(key.to_string());
}

#[async_trait]
impl<T> Tier<T> for LocalTier<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<T>, TierError> {
        let mut state = self.state.lock();
        if let Some(value) = state.map.get(key).cloned() {
            touch(&mut state.order, key);
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: T) -> Result<(), TierError> {
        let mut state = self.state.lock();
        if !state.map.contains_key(key) && state.map.len() >= self.max_size {
            if let Some(oldest) = state.order.pop_front() {
                state.map.remove(&oldest);
            }
        }
        state.map.insert(key.to_string(), value);
        touch(&mut state.order, key);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<bool, TierError> {
        let mut state = self.state.lock();
        let existed = state.map.remove(key).is_some();
        if existed {
            if let Some(pos) = state.order.iter().position(|k| k == key) {
                state.order.remove(pos);
            }
        }
        Ok(existed)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, TierError> {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .map
            .keys()
            .filter(|k| wildcard_match(pattern, k))
            .cloned()
            .collect();
        for key in &doomed {
            state.map.remove(key);
            if let Some(pos) = state.order.iter().position(|k| k == key) {
                state.order.remove(pos);
            }
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_round_trip() {
        let tier = LocalTier::new(10);
        assert_eq!(tier.get("k").await.unwrap(), None);

        tier.set("k", "v".to_string()).await.unwrap();
        assert_eq!(tier.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let tier = LocalTier::new(2);
        tier.set("a", 1).await.unwrap();
        tier.set("b", 2).await.unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        let _ = tier.get("a").await.unwrap();
        tier.set("c", 3).await.unwrap();

        assert_eq!(tier.get("a").await.unwrap(), Some(1));
        assert_eq!(tier.get("b").await.unwrap(), None);
        assert_eq!(tier.get("c").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn overwrite_does_not_evict() {
        let tier = LocalTier::new(2);
        tier.set("a", 1).await.unwrap();
        tier.set("b", 2).await.unwrap();
        tier.set("a", 10).await.unwrap();

        assert_eq!(tier.len(), 2);
        assert_eq!(tier.get("a").await.unwrap(), Some(10));
        assert_eq!(tier.get("b").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn invalidate_reports_existence() {
        let tier = LocalTier::new(4);
        tier.set("k", 1).await.unwrap();

        assert!(tier.invalidate("k").await.unwrap());
        assert!(!tier.invalidate("k").await.unwrap());
        assert_eq!(tier.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_pattern_removes_matches() {
        let tier = LocalTier::new(10);
        tier.set("user:1", 1).await.unwrap();
        tier.set("user:2", 2).await.unwrap();
        tier.set("order:1", 3).await.unwrap();

        let removed = tier.invalidate_pattern("user:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get("order:1").await.unwrap(), Some(3));
    }
}
