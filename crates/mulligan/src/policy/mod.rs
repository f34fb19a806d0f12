// Copyright (c) Microsoft Corporation.

//! Retry policies: whether the engine may try again.
//!
//! A policy owns the lifecycle of a [`RetryContext`]: it opens one when an
//! execution starts, is consulted before every attempt via
//! [`can_retry`][RetryPolicy::can_retry], records every failure via
//! [`register_fault`][RetryPolicy::register_fault], and releases resources in
//! [`close`][RetryPolicy::close].
//!
//! Provided policies:
//!
//! | Policy | Allows another attempt when |
//! |--------|------------------------------|
//! | [`NeverRetryPolicy`] | no fault has been recorded yet (exactly one attempt) |
//! | [`AlwaysRetryPolicy`] | always; compose with timeouts or `exhausted_only` |
//! | [`MaxAttemptsRetryPolicy`] | fewer than N faults recorded |
//! | [`FaultClassifierRetryPolicy`] | the last fault classifies as retryable |
//! | [`SimpleRetryPolicy`] | classifier allows it and fewer than N faults recorded |
//! | [`CompositeRetryPolicy`] | all (or any) of its children allow it |
//! | [`TimeoutRetryPolicy`] | the context opened less than a timeout ago |
//! | [`CircuitBreakerRetryPolicy`] | its delegate allows it and the circuit is closed |

mod circuit_breaker;
mod composite;
mod simple;
mod timeout;

use std::fmt::Debug;
use std::sync::Arc;

pub use circuit_breaker::{
    CircuitBreakerRetryPolicy, DEFAULT_OPEN_TIMEOUT, DEFAULT_RESET_TIMEOUT,
};
pub use composite::CompositeRetryPolicy;
pub use simple::{DEFAULT_MAX_ATTEMPTS, SimpleRetryPolicy};
pub use timeout::{DEFAULT_TIMEOUT, TimeoutRetryPolicy};

use triage::{BinaryErrorClassifier, Fault};

use crate::context::RetryContext;
use crate::supplier::Supplier;

/// Decides whether a failed operation may be attempted again.
///
/// Policies are shared between concurrent executions; per-execution state
/// belongs on the [`RetryContext`], not on the policy.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Allocates the context for a new execution, optionally linked to the
    /// context of an enclosing one.
    fn open(&self, parent: Option<&Arc<RetryContext>>) -> Arc<RetryContext> {
        Arc::new(RetryContext::new(parent.cloned()))
    }

    /// Returns true when the engine may run another attempt now.
    fn can_retry(&self, context: &RetryContext) -> bool;

    /// Records a failed attempt. Increments the context's retry count
    /// exactly once.
    fn register_fault(&self, context: &RetryContext, fault: &Fault) {
        context.record_fault(fault.clone());
    }

    /// Releases resources held for `context`. Closing twice is a no-op.
    fn close(&self, context: &RetryContext) {
        let _ = context;
    }

    /// Returns the policy's attempt bound, or `None` when unbounded.
    fn max_attempts(&self) -> Option<u32> {
        None
    }
}

/// Allows exactly one attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.retry_count() == 0
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(1)
    }
}

/// Always allows another attempt.
///
/// Intended to be composed with other exit signals: a
/// [`TimeoutRetryPolicy`], a listener, or the operation setting
/// [`set_exhausted_only`][RetryContext::set_exhausted_only].
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRetryPolicy;

impl RetryPolicy for AlwaysRetryPolicy {
    fn can_retry(&self, _context: &RetryContext) -> bool {
        true
    }
}

/// Bounds the number of attempts, with no interest in fault types.
#[derive(Clone, Debug)]
pub struct MaxAttemptsRetryPolicy {
    max_attempts: Supplier<u32>,
}

impl MaxAttemptsRetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts in total, including
    /// the first one.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self::with_supplier(max_attempts.into())
    }

    /// Creates a policy re-reading the bound before every attempt.
    #[must_use]
    pub fn with_supplier(max_attempts: Supplier<u32>) -> Self {
        Self { max_attempts }
    }
}

impl RetryPolicy for MaxAttemptsRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.retry_count() < self.max_attempts.get()
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(self.max_attempts.get())
    }
}

/// Retries for as long as the last fault classifies as retryable, with no
/// attempt bound.
#[derive(Clone, Debug)]
pub struct FaultClassifierRetryPolicy {
    classifier: BinaryErrorClassifier,
}

impl FaultClassifierRetryPolicy {
    /// Creates a policy deciding purely by `classifier`.
    #[must_use]
    pub fn new(classifier: BinaryErrorClassifier) -> Self {
        Self { classifier }
    }
}

impl RetryPolicy for FaultClassifierRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context
            .last_fault()
            .is_none_or(|fault| self.classifier.classify(&fault))
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    fn fault() -> Fault {
        Fault::new(std::io::Error::other("boom"))
    }

    #[test]
    fn assert_types() {
        assert_impl_all!(NeverRetryPolicy: RetryPolicy, Send, Sync);
        assert_impl_all!(AlwaysRetryPolicy: RetryPolicy, Send, Sync);
        assert_impl_all!(MaxAttemptsRetryPolicy: RetryPolicy, Send, Sync);
        assert_impl_all!(FaultClassifierRetryPolicy: RetryPolicy, Send, Sync);
    }

    #[test]
    fn never_allows_only_the_first_attempt() {
        let policy = NeverRetryPolicy;
        let context = policy.open(None);

        assert!(policy.can_retry(&context));
        policy.register_fault(&context, &fault());
        assert!(!policy.can_retry(&context));
        assert_eq!(policy.max_attempts(), Some(1));
    }

    #[test]
    fn always_never_gives_up() {
        let policy = AlwaysRetryPolicy;
        let context = policy.open(None);

        for _ in 0..100 {
            policy.register_fault(&context, &fault());
        }

        assert!(policy.can_retry(&context));
        assert_eq!(policy.max_attempts(), None);
    }

    #[test]
    fn max_attempts_counts_faults() {
        let policy = MaxAttemptsRetryPolicy::new(2);
        let context = policy.open(None);

        assert!(policy.can_retry(&context));
        policy.register_fault(&context, &fault());
        assert!(policy.can_retry(&context));
        policy.register_fault(&context, &fault());
        assert!(!policy.can_retry(&context));
    }

    #[test]
    fn classifier_policy_has_no_bound() {
        let policy = FaultClassifierRetryPolicy::new(
            BinaryErrorClassifier::new(true).with_rule::<std::fmt::Error>(false),
        );
        let context = policy.open(None);

        // No fault yet: the first attempt is always allowed.
        assert!(policy.can_retry(&context));

        policy.register_fault(&context, &fault());
        assert!(policy.can_retry(&context));

        policy.register_fault(&context, &Fault::new(std::fmt::Error));
        assert!(!policy.can_retry(&context));
        assert_eq!(policy.max_attempts(), None);
    }

    #[test]
    fn open_links_the_parent() {
        let policy = AlwaysRetryPolicy;
        let parent = policy.open(None);
        let child = policy.open(Some(&parent));

        assert!(child.parent().is_some_and(|p| Arc::ptr_eq(p, &parent)));
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let policy = MaxAttemptsRetryPolicy::new(2);
        let context = policy.open(None);
        policy.register_fault(&context, &fault());

        policy.close(&context);
        policy.close(&context);

        assert_eq!(context.retry_count(), 1);
    }
}
