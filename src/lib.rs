//! # Crosscut
//!
//! Composable primitives for the backend concerns that cut across every
//! service: parallel dependency resolution, distributed transactions with
//! rollback, multi-tier caching, and exactly-once execution.
//!
//! Four cooperating engines share one foundation — a lazy asynchronous
//! [`Action`](action::Action) and a set of combinators over it:
//!
//! - **Graph executor**: declare computation [`Node`](graph::Node)s by
//!   their dependency signature; independent nodes run concurrently, each
//!   node is constructed at most once per run, and protocol bindings give
//!   you dependency injection at the seams.
//! - **Saga runner**: sequence steps paired with compensators; a failure
//!   unwinds every applied compensator in reverse order and reports the
//!   rollback outcome.
//! - **Tiered cache**: stack ordered storage tiers behind one logical
//!   cache with read-through, write-through, and invalidation.
//! - **Idempotency executor**: exactly-once completion per key under
//!   concurrent callers, with configurable retention and in-flight policy.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use crosscut::prelude::*;
//!
//! let checkout = graph::<Receipt>()?;
//! let receipt = checkout
//!     .run()
//!     .given(order)
//!     .inject_as::<dyn Charger>(stripe)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod action;
pub mod cache;
pub mod cancellation;
pub mod combinators;
pub mod errors;
pub mod graph;
pub mod idempotency;
pub mod saga;

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::cache::{
        cache, CacheError, CacheExecutor, CacheResult, CacheSource, LocalTier, Tier, TierError,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::combinators::{
        fallback_chain, parallel, race_ok, retry, retry_with_backoff, timeout, traverse_par, zip,
        Backoff, TimeoutError,
    };
    pub use crate::errors::{BoxError, CrosscutError, ErrorDescriptor};
    pub use crate::graph::{
        graph, CycleError, DependencyDecl, Deps, Graph, GraphError, GraphStats, Node, Run,
    };
    pub use crate::idempotency::{
        idempotent, ClaimOutcome, IdempotencyError, IdempotencyExecutor, IdempotencyRecord,
        IdempotencyResult, MemoryStore, OnPending, Policy, RecordStatus, Store, StoreError,
    };
    pub use crate::saga::{
        run, run_cancellable, run_saga, step, RollbackError, Saga, SagaError, SagaFailure,
        SagaResult, SagaStep,
    };
}
