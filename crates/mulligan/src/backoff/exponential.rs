// Copyright (c) Microsoft Corporation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backoff::{BackOffContext, BackOffPolicy};
use crate::context::RetryContext;
use crate::error::SleepInterrupted;
use crate::rnd::Rnd;
use crate::sleeper::{Sleeper, ThreadSleeper};
use crate::supplier::Supplier;

/// Default first pause of [`ExponentialBackOffPolicy`].
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Default growth factor of [`ExponentialBackOffPolicy`].
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default pause cap of [`ExponentialBackOffPolicy`].
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Pauses for an interval that grows by a multiplier up to a cap.
///
/// [`start`][BackOffPolicy::start] snapshots the current parameter values
/// into a [`BackOffContext`], so supplier updates apply to future executions
/// without disturbing in-flight ones. Each pause sleeps
/// `min(interval, max)` and then advances the stored interval by the
/// multiplier while it is below the cap. Interval advancement is serialized
/// per context, so concurrent users of a shared context observe monotone
/// progression.
///
/// With [`jitter`][Self::jitter] enabled, the slept duration is spread to
/// `interval * (1 + U * (multiplier - 1))` with `U` uniform in `[0, 1)`,
/// still capped at the maximum; the stored interval advances by the
/// deterministic multiplier so the expected growth matches the non-jittered
/// policy. Jitter has no effect when the multiplier is 1.
#[derive(Clone, Debug)]
pub struct ExponentialBackOffPolicy {
    initial: Supplier<Duration>,
    multiplier: Supplier<f64>,
    max: Supplier<Duration>,
    jitter: bool,
    sleeper: Arc<dyn Sleeper>,
    rnd: Rnd,
}

struct ExponentialState {
    interval: Mutex<u64>,
    multiplier: f64,
    max_ms: u64,
}

impl ExponentialState {
    /// Returns the millisecond pause for this attempt and advances the
    /// stored interval. Serialized by the interval lock.
    fn sleep_and_advance(&self, jitter: bool, rnd: &Rnd) -> u64 {
        let mut interval = self.interval.lock();
        let sleep = (*interval).min(self.max_ms);

        let actual = if jitter && self.multiplier > 1.0 {
            let spread = sleep as f64 * (1.0 + rnd.next_f64() * (self.multiplier - 1.0));
            (spread as u64).min(self.max_ms)
        } else {
            sleep
        };

        if *interval < self.max_ms {
            *interval = (*interval as f64 * self.multiplier) as u64;
        }

        actual
    }
}

impl ExponentialBackOffPolicy {
    /// Creates a policy starting at `initial`, growing by `multiplier` up to
    /// `max`.
    ///
    /// `initial` is clamped to at least one millisecond and `multiplier` to
    /// at least 1.0.
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial: initial.into(),
            multiplier: multiplier.into(),
            max: max.into(),
            jitter: false,
            sleeper: Arc::new(ThreadSleeper),
            rnd: Rnd::default(),
        }
    }

    /// Replaces the initial-interval supplier.
    #[must_use]
    pub fn initial_supplier(mut self, initial: Supplier<Duration>) -> Self {
        self.initial = initial;
        self
    }

    /// Replaces the multiplier supplier.
    #[must_use]
    pub fn multiplier_supplier(mut self, multiplier: Supplier<f64>) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Replaces the maximum-interval supplier.
    #[must_use]
    pub fn max_supplier(mut self, max: Supplier<Duration>) -> Self {
        self.max = max;
        self
    }

    /// Enables or disables random spreading of the slept durations.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the sleeper used to pause.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[cfg(test)]
    fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    fn snapshot(&self) -> ExponentialState {
        let initial = u64::try_from(self.initial.get().as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(self.max.get().as_millis()).unwrap_or(u64::MAX).max(1);

        ExponentialState {
            interval: Mutex::new(initial),
            multiplier: self.multiplier.get().max(1.0),
            max_ms,
        }
    }
}

impl Default for ExponentialBackOffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL, DEFAULT_MULTIPLIER, DEFAULT_MAX_INTERVAL)
    }
}

impl BackOffPolicy for ExponentialBackOffPolicy {
    fn start(&self, _context: &RetryContext) -> Option<BackOffContext> {
        Some(BackOffContext::new(self.snapshot()))
    }

    fn back_off(&self, context: Option<&BackOffContext>) -> Result<(), SleepInterrupted> {
        let state = context.and_then(BackOffContext::downcast::<ExponentialState>);
        let pause = match state {
            Some(state) => state.sleep_and_advance(self.jitter, &self.rnd),
            // No context from start(); pause once from a fresh snapshot.
            None => self.snapshot().sleep_and_advance(self.jitter, &self.rnd),
        };

        self.sleeper.sleep(Duration::from_millis(pause))
    }
}
