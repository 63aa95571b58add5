//! Combinators over [`Action`]s.
//!
//! This module provides:
//! - Sequential resilience: [`retry`], [`retry_with_backoff`],
//!   [`timeout`], [`fallback_chain`]
//! - Concurrent fan-out: [`race_ok`], [`parallel`], [`zip`],
//!   [`traverse_par`]
//!
//! Composition order matters just as with middleware stacks: a timeout
//! around a retry bounds total time, a timeout inside a retry bounds
//! each attempt.

mod backoff;
mod fanout;

pub use backoff::Backoff;
pub use fanout::{parallel, race_ok, traverse_par, zip};

use crate::action::Action;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error returned by [`timeout`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError<E> {
    /// The timer won the race; the action was cancelled.
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),

    /// The action completed within the deadline, but failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    /// Returns the inner error, if the action failed on its own.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Elapsed(_) => None,
            Self::Inner(e) => Some(e),
        }
    }
}

/// Re-runs `action` until it succeeds, up to `attempts` total attempts.
///
/// Returns the last error when every attempt fails. No delay between
/// attempts; use [`retry_with_backoff`] for a schedule.
pub async fn retry<T, E>(action: &Action<T, E>, attempts: u32) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    retry_with_backoff(action, attempts, Backoff::none()).await
}

/// Re-runs `action` up to `attempts` total attempts, sleeping per the
/// [`Backoff`] schedule between attempts.
pub async fn retry_with_backoff<T, E>(
    action: &Action<T, E>,
    attempts: u32,
    backoff: Backoff,
) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match action.run().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt, attempts, "retry attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    let delay = backoff.delay_after(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    // attempts >= 1, so at least one Err was recorded.
    match last_err {
        Some(e) => Err(e),
        None => unreachable!("retry ran zero attempts"),
    }
}

/// Races `action` against a timer.
///
/// If the timer wins, the action's future is dropped and
/// [`TimeoutError::Elapsed`] is returned; a partial success can never
/// leak out. The action's own failure surfaces as
/// [`TimeoutError::Inner`].
pub async fn timeout<T, E>(action: &Action<T, E>, duration: Duration) -> Result<T, TimeoutError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    match tokio::time::timeout(duration, action.run()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed(duration)),
    }
}

/// Awaits actions in order, returning the first success.
///
/// Later actions run only if every earlier one failed. When all fail,
/// the last error is returned. The non-empty requirement is carried by
/// the signature: `first` is always present.
pub async fn fallback_chain<T, E>(first: &Action<T, E>, rest: &[Action<T, E>]) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut last_err = match first.run().await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for (i, action) in rest.iter().enumerate() {
        debug!(fallback = i + 1, "falling back to next action");
        match action.run().await {
            Ok(value) => return Ok(value),
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}
