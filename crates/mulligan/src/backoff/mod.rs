// Copyright (c) Microsoft Corporation.

//! Backoff policies: how long to pause between retry attempts.
//!
//! A backoff policy is consulted by the engine after each failed attempt that
//! will be retried. Policies with per-execution state (the exponential
//! family) return a [`BackOffContext`] from [`start`][BackOffPolicy::start];
//! stateless policies return `None`. All pausing goes through a
//! [`Sleeper`][crate::Sleeper] so tests can observe delays without waiting.
//!
//! Provided policies:
//!
//! | Policy | Delay |
//! |--------|-------|
//! | [`NoBackOffPolicy`] | none (the default) |
//! | [`FixedBackOffPolicy`] | a constant period, default 1 s |
//! | [`UniformRandomBackOffPolicy`] | uniform in `[min, max)`, default 500–1500 ms |
//! | [`ExponentialBackOffPolicy`] | growing by a multiplier up to a cap, optionally jittered |

mod exponential;

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub use exponential::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER, ExponentialBackOffPolicy,
};

use crate::context::RetryContext;
use crate::error::SleepInterrupted;
use crate::rnd::Rnd;
use crate::sleeper::{Sleeper, ThreadSleeper};
use crate::supplier::Supplier;

/// Default period of [`FixedBackOffPolicy`].
pub const DEFAULT_FIXED_PERIOD: Duration = Duration::from_millis(1000);

/// Default lower bound of [`UniformRandomBackOffPolicy`].
pub const DEFAULT_UNIFORM_MIN: Duration = Duration::from_millis(500);

/// Default upper bound of [`UniformRandomBackOffPolicy`].
pub const DEFAULT_UNIFORM_MAX: Duration = Duration::from_millis(1500);

/// Computes and applies the pause between retry attempts.
pub trait BackOffPolicy: Send + Sync + Debug {
    /// Called once per execution before the first attempt.
    ///
    /// Stateful policies snapshot their parameters into the returned context;
    /// stateless policies return `None`. In stateful retry mode the engine
    /// carries the returned context across invocations on the retry context,
    /// so the delay sequence continues where the previous invocation left
    /// off.
    fn start(&self, context: &RetryContext) -> Option<BackOffContext> {
        let _ = context;
        None
    }

    /// Pauses the calling thread before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SleepInterrupted`] when the underlying sleep was cancelled;
    /// the engine aborts retrying in that case.
    fn back_off(&self, context: Option<&BackOffContext>) -> Result<(), SleepInterrupted>;
}

/// Opaque per-execution state produced by [`BackOffPolicy::start`].
///
/// Cloning is cheap and clones share the same underlying state.
#[derive(Clone)]
pub struct BackOffContext(Arc<dyn Any + Send + Sync>);

impl BackOffContext {
    /// Wraps policy-specific state.
    pub fn new(state: impl Any + Send + Sync) -> Self {
        Self(Arc::new(state))
    }

    /// Borrows the state as `T`, if that is its concrete type.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast().ok()
    }
}

impl Debug for BackOffContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackOffContext").finish_non_exhaustive()
    }
}

/// A backoff policy that does not pause at all. This is the engine's default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBackOffPolicy;

impl BackOffPolicy for NoBackOffPolicy {
    fn back_off(&self, _context: Option<&BackOffContext>) -> Result<(), SleepInterrupted> {
        Ok(())
    }
}

/// Pauses for a fixed period between attempts.
///
/// The period is read through a [`Supplier`] on every pause and clamped to at
/// least one millisecond.
#[derive(Clone, Debug)]
pub struct FixedBackOffPolicy {
    period: Supplier<Duration>,
    sleeper: Arc<dyn Sleeper>,
}

impl FixedBackOffPolicy {
    /// Creates a policy sleeping `period` between attempts.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self::with_supplier(period.into())
    }

    /// Creates a policy re-reading the period on every pause.
    #[must_use]
    pub fn with_supplier(period: Supplier<Duration>) -> Self {
        Self {
            period,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replaces the sleeper used to pause.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl Default for FixedBackOffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FIXED_PERIOD)
    }
}

impl BackOffPolicy for FixedBackOffPolicy {
    fn back_off(&self, _context: Option<&BackOffContext>) -> Result<(), SleepInterrupted> {
        let period = self.period.get().max(Duration::from_millis(1));
        self.sleeper.sleep(period)
    }
}

/// Pauses for a uniformly distributed random duration in `[min, max)`.
///
/// When `min >= max` the pause is exactly `min`.
#[derive(Clone, Debug)]
pub struct UniformRandomBackOffPolicy {
    min: Supplier<Duration>,
    max: Supplier<Duration>,
    sleeper: Arc<dyn Sleeper>,
    rnd: Rnd,
}

impl UniformRandomBackOffPolicy {
    /// Creates a policy sleeping between `min` (inclusive) and `max`
    /// (exclusive).
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self::with_suppliers(min.into(), max.into())
    }

    /// Creates a policy re-reading both bounds on every pause.
    #[must_use]
    pub fn with_suppliers(min: Supplier<Duration>, max: Supplier<Duration>) -> Self {
        Self {
            min,
            max,
            sleeper: Arc::new(ThreadSleeper),
            rnd: Rnd::default(),
        }
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
}

impl Default for UniformRandomBackOffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UNIFORM_MIN, DEFAULT_UNIFORM_MAX)
    }
}

impl BackOffPolicy for UniformRandomBackOffPolicy {
    fn back_off(&self, _context: Option<&BackOffContext>) -> Result<(), SleepInterrupted> {
        let min = u64::try_from(self.min.get().as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.get().as_millis()).unwrap_or(u64::MAX);
        let delta = max.saturating_sub(min);
        let pause = min.saturating_add(self.rnd.below(delta));
        self.sleeper.sleep(Duration::from_millis(pause))
    }
}
