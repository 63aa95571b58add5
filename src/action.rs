//! Lazy asynchronous actions.
//!
//! An [`Action`] is a deferred computation: constructing one performs no
//! work and no I/O; [`Action::run`] executes it and yields a `Result`.
//! Actions are cheap to clone and may be run more than once — `retry`
//! relies on that. Exactly-once semantics are the idempotency executor's
//! job, not the action's.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future alias used across the crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Thunk<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// A lazy asynchronous computation yielding `Result<T, E>`.
pub struct Action<T, E> {
    thunk: Thunk<T, E>,
}

impl<T, E> Clone for Action<T, E> {
    fn clone(&self) -> Self {
        Self {
            thunk: Arc::clone(&self.thunk),
        }
    }
}

impl<T, E> std::fmt::Debug for Action<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}

impl<T, E> Action<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates an action from a zero-argument async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            thunk: Arc::new(move || Box::pin(f())),
        }
    }

    /// Creates an action from a synchronous fallible closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::new(move || {
            let result = f();
            async move { result }
        })
    }

    /// Lifts a pure value into an always-succeeding action.
    pub fn ok(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Lifts an error into an always-failing action.
    pub fn err(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::new(move || {
            let error = error.clone();
            async move { Err(error) }
        })
    }

    /// Lifts a fallible async call, mapping its error into `E`.
    pub fn lift<F, Fut, X, M>(f: F, map_err: M) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, X>> + Send + 'static,
        X: Send + 'static,
        M: Fn(X) -> E + Send + Sync + Clone + 'static,
    {
        Self::new(move || {
            let fut = f();
            let map_err = map_err.clone();
            async move { fut.await.map_err(map_err) }
        })
    }

    /// Executes the action.
    pub async fn run(&self) -> Result<T, E> {
        (self.thunk)().await
    }

    /// Maps the success value.
    pub fn map<U, F>(self, f: F) -> Action<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let thunk = self.thunk;
        let f = Arc::new(f);
        Action {
            thunk: Arc::new(move || {
                let fut = thunk();
                let f = Arc::clone(&f);
                Box::pin(async move { fut.await.map(|v| f(v)) })
            }),
        }
    }

    /// Maps the error value.
    pub fn map_err<F2, F>(self, f: F) -> Action<T, F2>
    where
        F2: Send + 'static,
        F: Fn(E) -> F2 + Send + Sync + 'static,
    {
        let thunk = self.thunk;
        let f = Arc::new(f);
        Action {
            thunk: Arc::new(move || {
                let fut = thunk();
                let f = Arc::clone(&f);
                Box::pin(async move { fut.await.map_err(|e| f(e)) })
            }),
        }
    }

    /// Sequences a dependent action after this one.
    ///
    /// The continuation runs only when this action succeeds; its action
    /// is constructed from the success value on every run.
    pub fn and_then<U, F>(self, f: F) -> Action<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> Action<U, E> + Send + Sync + 'static,
    {
        let thunk = self.thunk;
        let f = Arc::new(f);
        Action {
            thunk: Arc::new(move || {
                let fut = thunk();
                let f = Arc::clone(&f);
                Box::pin(async move {
                    match fut.await {
                        Ok(value) => f(value).run().await,
                        Err(e) => Err(e),
                    }
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn construction_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let action: Action<i32, String> = Action::new(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(action.run().await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn actions_can_run_more_than_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let action: Action<usize, String> = Action::new(move || {
            let calls = calls_clone.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) }
        });

        assert_eq!(action.run().await, Ok(0));
        assert_eq!(action.clone().run().await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pure_lifts() {
        let ok: Action<i32, String> = Action::ok(7);
        let err: Action<i32, String> = Action::err("boom".to_string());

        assert_eq!(ok.run().await, Ok(7));
        assert_eq!(err.run().await, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn lift_maps_the_error_type() {
        let action: Action<i32, String> = Action::lift(
            || async { Err::<i32, std::num::ParseIntError>("x".parse::<i32>().unwrap_err()) },
            |e| e.to_string(),
        );

        assert!(action.run().await.unwrap_err().contains("invalid digit"));
    }

    #[tokio::test]
    async fn map_and_map_err() {
        let action: Action<i32, String> = Action::ok(10);
        assert_eq!(action.map(|v| v * 2).run().await, Ok(20));

        let failing: Action<i32, String> = Action::err("raw".to_string());
        assert_eq!(
            failing.map_err(|e| format!("wrapped: {e}")).run().await,
            Err("wrapped: raw".to_string())
        );
    }

    #[tokio::test]
    async fn and_then_sequences() {
        let action: Action<i32, String> = Action::ok(3);
        let chained = action.and_then(|v| Action::ok(v + 1));
        assert_eq!(chained.run().await, Ok(4));

        let short_circuit: Action<i32, String> = Action::err("first".to_string());
        let chained = short_circuit.and_then(|v| Action::ok(v + 1));
        assert_eq!(chained.run().await, Err("first".to_string()));
    }

    #[tokio::test]
    async fn from_fn_wraps_sync_code() {
        let action: Action<i32, String> = Action::from_fn(|| "21".parse::<i32>().map_err(|e| e.to_string()));
        assert_eq!(action.run().await, Ok(21));
    }
}
