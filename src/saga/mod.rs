//! Saga execution with automatic rollback.
//!
//! A saga is a sequence of steps, each pairing an [`Action`] with an
//! optional compensator that undoes it. When a later step fails, the
//! compensators of every successfully applied step run in reverse
//! order; compensator failures are collected, never fatal to the
//! unwind.
//!
//! ```rust,ignore
//! let booking = step(reserve_flight).compensate(|f| cancel_flight(f));
//! let trip = booking.then(|f| step(reserve_hotel(f)).compensate(cancel_hotel));
//! let outcome = run_saga(&trip).await;
//! ```
//!
//! [`Action`]: crate::action::Action

mod run;
mod types;

pub use run::{parallel_steps, race_steps, run, run_cancellable, run_saga};
pub use types::{
    step, RollbackError, Saga, SagaError, SagaFailure, SagaResult, SagaStep,
};
