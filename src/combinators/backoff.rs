//! Retry delay schedules.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Growth {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
enum Jitter {
    Exact,
    Full,
    Equal,
}

/// Delay schedule consumed by
/// [`retry_with_backoff`](super::retry_with_backoff).
///
/// A schedule composes three decisions: how the delay grows with the
/// attempt number, an optional cap on the grown delay, and how much
/// jitter spreads callers out so synchronized retries do not stampede
/// a recovering dependency.
///
/// ```rust,ignore
/// let schedule = Backoff::exponential(Duration::from_millis(100))
///     .capped_at(Duration::from_secs(5))
///     .full_jitter();
/// let result = retry_with_backoff(&charge, 5, schedule).await;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    growth: Growth,
    jitter: Jitter,
    cap: Option<Duration>,
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Backoff {
    fn with_growth(base: Duration, growth: Growth) -> Self {
        Self {
            base,
            growth,
            jitter: Jitter::Exact,
            cap: None,
        }
    }

    /// No delay between attempts.
    #[must_use]
    pub fn none() -> Self {
        Self::with_growth(Duration::ZERO, Growth::Constant)
    }

    /// The same `base` delay before every retry.
    #[must_use]
    pub fn constant(base: Duration) -> Self {
        Self::with_growth(base, Growth::Constant)
    }

    /// `base` scaled by the attempt number.
    #[must_use]
    pub fn linear(base: Duration) -> Self {
        Self::with_growth(base, Growth::Linear)
    }

    /// `base` doubled on every retry.
    #[must_use]
    pub fn exponential(base: Duration) -> Self {
        Self::with_growth(base, Growth::Exponential)
    }

    /// Bounds the grown delay. The cap applies before jitter, so
    /// jittered delays never exceed it either.
    #[must_use]
    pub fn capped_at(mut self, cap: Duration) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Spreads each delay uniformly over `[0, delay]`.
    #[must_use]
    pub fn full_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// Shaves up to half off each delay, keeping `[delay/2, delay]`.
    #[must_use]
    pub fn equal_jitter(mut self) -> Self {
        self.jitter = Jitter::Equal;
        self
    }

    /// The delay to sleep after failed attempt `attempt` (1-based; 0
    /// is treated as the first attempt).
    ///
    /// All arithmetic saturates, so absurd attempt numbers yield a
    /// huge delay rather than a wrapped tiny one.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = as_millis(self.base);
        let attempt = attempt.max(1);

        let grown = match self.growth {
            Growth::Constant => base,
            Growth::Linear => base.saturating_mul(u64::from(attempt)),
            Growth::Exponential => {
                let doublings = (attempt - 1).min(63);
                base.saturating_mul(1u64 << doublings)
            }
        };

        let capped = match self.cap {
            Some(cap) => grown.min(as_millis(cap)),
            None => grown,
        };

        let slept = match self.jitter {
            Jitter::Exact => capped,
            Jitter::Full => rand::thread_rng().gen_range(0..=capped),
            Jitter::Equal => capped.saturating_sub(rand::thread_rng().gen_range(0..=capped / 2)),
        };
        Duration::from_millis(slept)
    }
}
