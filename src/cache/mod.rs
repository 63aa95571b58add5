//! Tiered caching.
//!
//! An ordered stack of storage [`Tier`]s behind one logical cache:
//! reads probe tiers shallow to deep, a deep hit refills the shallower
//! tiers, a full miss falls through to the fetch function and
//! write-throughs every tier.
//!
//! Concurrent callers are deliberately not deduplicated here; layer the
//! idempotency executor on top when single-flight reads matter.

mod executor;
mod local;
mod tier;

pub use executor::{cache, CacheBuilder, CacheError, CacheExecutor, CacheResult, CacheSource};
pub use local::LocalTier;
pub use tier::{Tier, TierError};
