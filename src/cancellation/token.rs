//! Cancellation token for cooperative cancellation.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Lifecycle of a token. Callbacks queue up while the token is
/// active; the first cancellation swaps in the reason and drains them.
/// The two never coexist, so one slot holds both.
enum State {
    Active { callbacks: Vec<CancelCallback> },
    Cancelled { reason: String },
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Runs a cancellation callback without letting a panicking one take
/// the cancelling task down with it.
fn dispatch(callback: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
        warn!("cancellation callback panicked");
    }
}

/// A token for cooperative cancellation.
///
/// Clones share state: any holder may cancel and every holder
/// observes it. Cancellation is a one-way transition and the first
/// reason wins. Consumers either poll
/// [`is_cancelled`](Self::is_cancelled) or await
/// [`cancelled`](Self::cancelled) inside a `select!`.
#[derive(Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Active {
                    callbacks: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// The first call wins; later calls are no-ops. Queued callbacks
    /// are drained exactly once, on the winning caller's stack, after
    /// the state flips and waiters are woken.
    pub fn cancel(&self, reason: impl Into<String>) {
        let drained = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Cancelled { .. } => return,
                State::Active { callbacks } => {
                    let drained = std::mem::take(callbacks);
                    *state = State::Cancelled {
                        reason: reason.into(),
                    };
                    drained
                }
            }
        };

        self.shared.notify.notify_waiters();
        for callback in drained {
            dispatch(move || callback());
        }
    }

    /// Registers a callback invoked on cancellation.
    ///
    /// Registering on an already-cancelled token runs the callback
    /// right away.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if let State::Active { callbacks } = &mut *state {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        dispatch(callback);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Cancelled { .. })
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match &*self.shared.state.lock() {
            State::Cancelled { reason } => Some(reason.clone()),
            State::Active { .. } => None,
        }
    }

    /// Resolves once the token is cancelled.
    ///
    /// Safe to call from any number of tasks; resolves immediately if
    /// cancellation already happened. The waiter is armed before the
    /// state check, so a cancel landing in between cannot be missed.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = self.reason();
        f.debug_struct("CancellationToken")
            .field("cancelled", &reason.is_some())
            .field("reason", &reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn starts_active() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_is_one_way_and_keeps_the_first_reason() {
        let token = CancellationToken::new();
        token.cancel("disk full");
        token.cancel("shutdown");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("disk full".to_string()));
    }

    #[test]
    fn cancellation_is_observed_through_clones() {
        let token = CancellationToken::new();
        token.clone().cancel("from a clone");
        assert_eq!(token.reason(), Some("from a clone".to_string()));
    }

    #[test]
    fn queued_callbacks_drain_exactly_once() {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let fired = fired.clone();
            token.on_cancel(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        token.cancel("draining");
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        // A losing cancel must not replay the queue.
        token.cancel("again");
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_registration_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel("already over");

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        token.on_cancel(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_does_not_starve_the_rest() {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));

        token.on_cancel(|| panic!("bad callback"));
        let fired_clone = fired.clone();
        token.on_cancel(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel("test");
        assert!(token.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiters_wake_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("wake up");

        let observed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should resolve")
            .expect("waiter should not panic");
        assert_eq!(observed, Some("wake up".to_string()));
    }

    #[tokio::test]
    async fn waiting_on_a_cancelled_token_returns_at_once() {
        let token = CancellationToken::new();
        token.cancel("early");
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should resolve immediately");
    }
}
