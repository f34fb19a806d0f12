// Copyright (c) Microsoft Corporation.

use std::fmt::Debug;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::SleepInterrupted;

/// Suspends the calling thread between retry attempts.
///
/// Every backoff policy sleeps through a `Sleeper` rather than calling
/// [`std::thread::sleep`] inline, so tests can substitute a recording
/// implementation and stay deterministic.
///
/// The contract: `sleep` blocks the caller for at least `duration`, or
/// returns [`SleepInterrupted`] when the host's cancellation mechanism cut
/// the pause short. An interrupted sleep aborts retrying.
pub trait Sleeper: Send + Sync + Debug {
    /// Blocks the calling thread for at least `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`SleepInterrupted`] when the sleep was cancelled before the
    /// duration elapsed.
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted>;
}

/// The default [`Sleeper`]: blocks via [`std::thread::sleep`].
///
/// This sleeper cannot be interrupted and never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// A [`Sleeper`] that records requested durations without waiting.
///
/// Intended for tests that assert on backoff behavior.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use mulligan::backoff::{BackOffPolicy, FixedBackOffPolicy};
/// use mulligan::RecordingSleeper;
///
/// let sleeper = Arc::new(RecordingSleeper::new());
/// let backoff = FixedBackOffPolicy::new(Duration::from_millis(10)).sleeper(Arc::clone(&sleeper));
///
/// backoff.back_off(None).unwrap();
/// assert_eq!(sleeper.durations(), vec![Duration::from_millis(10)]);
/// ```
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a sleeper with an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the durations requested so far, in order.
    #[must_use]
    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    /// Returns the sum of all durations requested so far.
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), SleepInterrupted> {
        self.slept.lock().push(duration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn assert_types() {
        assert_impl_all!(ThreadSleeper: Sleeper, Send, Sync);
        assert_impl_all!(RecordingSleeper: Sleeper, Send, Sync);
    }

    #[test]
    fn thread_sleeper_blocks_for_at_least_the_duration() {
        let before = Instant::now();
        ThreadSleeper.sleep(Duration::from_millis(20)).expect("never interrupted");
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn recording_sleeper_records_without_waiting() {
        let sleeper = RecordingSleeper::new();

        sleeper.sleep(Duration::from_millis(5)).expect("never interrupted");
        sleeper.sleep(Duration::from_millis(7)).expect("never interrupted");

        assert_eq!(
            sleeper.durations(),
            vec![Duration::from_millis(5), Duration::from_millis(7)]
        );
        assert_eq!(sleeper.total_slept(), Duration::from_millis(12));
    }
}
