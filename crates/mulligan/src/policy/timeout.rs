// Copyright (c) Microsoft Corporation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::RetryContext;
use crate::policy::RetryPolicy;
use crate::supplier::Supplier;

/// Attribute key holding the instant the context was opened.
const OPENED_AT: &str = "timeout.start";

/// Default bound of [`TimeoutRetryPolicy`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Allows retrying only while the context is younger than a timeout.
///
/// There is no bound on the number of attempts; combine with a
/// [`CompositeRetryPolicy`][crate::policy::CompositeRetryPolicy] when both a
/// count and a deadline are wanted. The clock starts when the context is
/// opened, so in stateful mode the deadline spans all invocations that share
/// the context.
#[derive(Clone, Debug)]
pub struct TimeoutRetryPolicy {
    timeout: Supplier<Duration>,
}

impl TimeoutRetryPolicy {
    /// Creates a policy allowing attempts for `timeout` after open.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_supplier(timeout.into())
    }

    /// Creates a policy re-reading the timeout on every decision.
    #[must_use]
    pub fn with_supplier(timeout: Supplier<Duration>) -> Self {
        Self { timeout }
    }
}

impl Default for TimeoutRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl RetryPolicy for TimeoutRetryPolicy {
    fn open(&self, parent: Option<&Arc<RetryContext>>) -> Arc<RetryContext> {
        let context = Arc::new(RetryContext::new(parent.cloned()));
        context.set_attribute(OPENED_AT, Instant::now());
        context
    }

    fn can_retry(&self, context: &RetryContext) -> bool {
        context
            .attribute::<Instant>(OPENED_AT)
            .is_some_and(|opened_at| opened_at.elapsed() < self.timeout.get())
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn assert_types() {
        assert_impl_all!(TimeoutRetryPolicy: RetryPolicy, Send, Sync);
    }

    #[test]
    fn allows_attempts_until_the_deadline() {
        let policy = TimeoutRetryPolicy::new(Duration::from_millis(80));
        let context = policy.open(None);

        assert!(policy.can_retry(&context));

        std::thread::sleep(Duration::from_millis(120));
        assert!(!policy.can_retry(&context));
    }

    #[test]
    fn has_no_attempt_bound() {
        assert_eq!(TimeoutRetryPolicy::default().max_attempts(), None);
    }

    #[test]
    fn foreign_context_is_not_retryable() {
        // A context without the open timestamp was not opened by this policy.
        let policy = TimeoutRetryPolicy::default();
        let context = RetryContext::new(None);
        assert!(!policy.can_retry(&context));
    }
}
