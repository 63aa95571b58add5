//! Retention and conflict policy.

use std::time::Duration;

/// What a caller does when another claim is in flight for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPending {
    /// Wait for the in-flight operation and return its outcome.
    #[default]
    Wait,
    /// Return [`IdempotencyError::InFlight`] immediately.
    ///
    /// [`IdempotencyError::InFlight`]: super::IdempotencyError::InFlight
    FailFast,
    /// Overwrite the pending claim and execute anyway. The previous
    /// winner's eventual completion is discarded.
    Force,
}

/// Idempotency executor configuration.
///
/// Immutable value type; the `with_*` methods return an updated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// How long a `Done` record is served. `None` keeps it forever.
    pub success_ttl: Option<Duration>,
    /// How long a `Failed` record blocks re-execution. `None` keeps it
    /// forever; the default of zero retains nothing, so failures retry
    /// immediately.
    pub failure_ttl: Option<Duration>,
    /// How long a `Pending` claim blocks other callers before it is
    /// considered abandoned.
    pub pending_lease: Duration,
    /// Conflict strategy when a claim is already in flight.
    pub on_pending: OnPending,
    /// Upper bound on waiting under [`OnPending::Wait`].
    pub wait_timeout: Duration,
    /// Poll interval while waiting on an in-flight record.
    pub wait_poll_interval: Duration,
    /// Whether to fingerprint inputs and reject key reuse with a
    /// different payload.
    pub input_fingerprint: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            success_ttl: None,
            failure_ttl: Some(Duration::ZERO),
            pending_lease: Duration::from_secs(30),
            on_pending: OnPending::Wait,
            wait_timeout: Duration::from_secs(30),
            wait_poll_interval: Duration::from_millis(15),
            input_fingerprint: false,
        }
    }
}

impl Policy {
    /// Sets the retention for completed records.
    #[must_use]
    pub fn with_success_ttl(mut self, ttl: Duration) -> Self {
        self.success_ttl = Some(ttl);
        self
    }

    /// Sets the retention for failed records.
    #[must_use]
    pub fn with_failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = Some(ttl);
        self
    }

    /// Sets how long a pending claim holds off other callers.
    #[must_use]
    pub fn with_pending_lease(mut self, lease: Duration) -> Self {
        self.pending_lease = lease;
        self
    }

    /// Sets the in-flight conflict strategy.
    #[must_use]
    pub fn with_on_pending(mut self, on_pending: OnPending) -> Self {
        self.on_pending = on_pending;
        self
    }

    /// Sets the wait timeout used under [`OnPending::Wait`].
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Sets the poll interval used while waiting.
    #[must_use]
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Enables or disables input fingerprinting.
    #[must_use]
    pub fn with_input_fingerprint(mut self, enabled: bool) -> Self {
        self.input_fingerprint = enabled;
        self
    }
}
