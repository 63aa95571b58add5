//! Exactly-once execution per key.
//!
//! For a keyed operation, the executor guarantees that across
//! concurrent or retried invocations sharing a key, the operation runs
//! at most once to success and every caller observes the same value
//! until the success TTL lapses. A [`Store`] backend serializes claims
//! per key; [`MemoryStore`] covers single-process use and tests, and
//! the trait is the seam for SQL- or Redis-backed implementations.
//!
//! ```rust,ignore
//! let executor = idempotent(submit_payment)
//!     .key(|req: &PaymentRequest| format!("payment:{}", req.reference))
//!     .policy(Policy::default().with_success_ttl(Duration::from_secs(3600)))
//!     .build();
//!
//! let outcome = executor.run(&request).await?;
//! ```

mod executor;
mod memory;
mod policy;
mod store;
mod types;

pub use executor::{idempotent, IdempotencyBuilder, IdempotencyExecutor, KeyedIdempotencyBuilder};
pub use memory::MemoryStore;
pub use policy::{OnPending, Policy};
pub use store::{ClaimOutcome, Store, StoreError};
pub use types::{
    FailedRecord, IdempotencyError, IdempotencyRecord, IdempotencyResult, RecordStatus,
};
