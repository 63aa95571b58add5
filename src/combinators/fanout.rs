//! Concurrent fan-out combinators.
//!
//! All of these spawn real tasks, so siblings make progress
//! concurrently. Dropping the `JoinSet` aborts whatever is still in
//! flight; an aborted action never delivers a partial success.

use crate::action::Action;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Awaits all actions concurrently; the first `Ok` wins and the rest
/// are aborted. If every action fails, the last observed error is
/// returned.
pub async fn race_ok<T, E>(first: &Action<T, E>, rest: &[Action<T, E>]) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut set = JoinSet::new();
    for action in std::iter::once(first).chain(rest.iter()) {
        let action = action.clone();
        set.spawn(async move { action.run().await });
    }

    let mut last_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_err = Some(e),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => unreachable!("race_ok spawned at least one task"),
    }
}

/// Awaits all actions concurrently.
///
/// Returns `Ok` with every value in input order iff all succeed;
/// otherwise the first encountered error, with the remaining actions
/// aborted.
pub async fn parallel<T, E>(actions: &[Action<T, E>]) -> Result<Vec<T>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, action) in actions.iter().enumerate() {
        let action = action.clone();
        set.spawn(async move { (index, action.run().await) });
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(actions.len()).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => slots[index] = Some(value),
            Ok((index, Err(e))) => {
                debug!(index, "parallel action failed, aborting siblings");
                return Err(e);
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Awaits two differently-typed actions concurrently; fails fast on the
/// first error, dropping the other action's future.
pub async fn zip<A, B, E>(a: &Action<A, E>, b: &Action<B, E>) -> Result<(A, B), E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
{
    tokio::try_join!(a.run(), b.run())
}

/// Bounded-concurrency traversal.
///
/// Applies `f` to every item, running at most `concurrency` resulting
/// actions at once. Output order matches input order. Fail-fast: the
/// first error aborts in-flight and queued siblings.
pub async fn traverse_par<I, T, E, F>(
    items: Vec<I>,
    f: F,
    concurrency: usize,
) -> Result<Vec<T>, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Action<T, E> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let total = items.len();

    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let f = Arc::clone(&f);
        set.spawn(async move {
            // The semaphore is never closed, so acquisition only fails
            // if the whole set is being torn down.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                unreachable!("traversal semaphore closed");
            };
            (index, f(item).run().await)
        });
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => slots[index] = Some(value),
            Ok((index, Err(e))) => {
                debug!(index, "traversal item failed, aborting siblings");
                return Err(e);
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }
    }

    Ok(slots.into_iter().flatten().collect())
}
