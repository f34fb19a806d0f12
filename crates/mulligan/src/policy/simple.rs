// Copyright (c) Microsoft Corporation.

use triage::BinaryErrorClassifier;

use crate::context::{RetryContext, keys};
use crate::policy::RetryPolicy;
use crate::supplier::Supplier;

/// Default attempt bound of [`SimpleRetryPolicy`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The workhorse policy: an attempt bound combined with a retryability
/// classifier.
///
/// Another attempt is allowed while the last fault (if any) classifies as
/// retryable and fewer than `max_attempts` faults have been recorded. The
/// bound includes the initial attempt, so the default of 3 means at most two
/// retries. A bound of 0 rejects retrying before the first attempt; the
/// engine treats that as immediate exhaustion.
///
/// An optional *not-recoverable* classifier marks faults for which recovery
/// must be skipped: when the policy gives up on such a fault it sets the
/// [`context.no-recovery`][keys::NO_RECOVERY] attribute, and the engine
/// bypasses any recovery function.
#[derive(Clone, Debug)]
pub struct SimpleRetryPolicy {
    max_attempts: Supplier<u32>,
    retryable: BinaryErrorClassifier,
    not_recoverable: Option<BinaryErrorClassifier>,
}

impl SimpleRetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts of any fault.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self::with_classifier(max_attempts, BinaryErrorClassifier::new(true))
    }

    /// Creates a policy allowing `max_attempts` attempts of faults that
    /// `retryable` classifies as `true`.
    #[must_use]
    pub fn with_classifier(max_attempts: u32, retryable: BinaryErrorClassifier) -> Self {
        Self {
            max_attempts: max_attempts.into(),
            retryable,
            not_recoverable: None,
        }
    }

    /// Replaces the attempt-bound supplier; the bound is re-read before
    /// every attempt.
    #[must_use]
    pub fn max_attempts_supplier(mut self, max_attempts: Supplier<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Installs the classifier marking faults whose recovery must be
    /// skipped.
    #[must_use]
    pub fn not_recoverable(mut self, classifier: BinaryErrorClassifier) -> Self {
        self.not_recoverable = Some(classifier);
        self
    }
}

impl Default for SimpleRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        let fault = context.last_fault();
        let can = fault.as_ref().is_none_or(|f| self.retryable.classify(f))
            && context.retry_count() < self.max_attempts.get();

        if !can {
            // Giving up: decide whether recovery is allowed for this fault.
            let skip_recovery = match (&fault, &self.not_recoverable) {
                (Some(fault), Some(classifier)) => classifier.classify(fault),
                _ => false,
            };
            if skip_recovery {
                context.set_attribute(keys::NO_RECOVERY, true);
            } else {
                context.remove_attribute(keys::NO_RECOVERY);
            }
        }

        can
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(self.max_attempts.get())
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;
    use triage::Fault;

    use super::*;

    #[derive(Debug)]
    struct Fatal;

    impl std::fmt::Display for Fatal {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fatal")
        }
    }

    impl std::error::Error for Fatal {}

    fn fault() -> Fault {
        Fault::new(std::io::Error::other("boom"))
    }

    #[test]
    fn assert_types() {
        assert_impl_all!(SimpleRetryPolicy: RetryPolicy, Send, Sync);
    }

    #[test]
    fn default_allows_three_attempts() {
        let policy = SimpleRetryPolicy::default();
        let context = policy.open(None);

        assert_eq!(policy.max_attempts(), Some(3));
        assert!(policy.can_retry(&context));

        for _ in 0..3 {
            policy.register_fault(&context, &fault());
        }

        assert!(!policy.can_retry(&context));
    }

    #[test]
    fn fresh_context_is_retryable_regardless_of_classifier() {
        let policy =
            SimpleRetryPolicy::with_classifier(3, BinaryErrorClassifier::new(false));
        let context = policy.open(None);

        assert!(policy.can_retry(&context));
    }

    #[test]
    fn non_retryable_fault_stops_immediately() {
        let policy = SimpleRetryPolicy::with_classifier(
            3,
            BinaryErrorClassifier::new(true).with_rule::<Fatal>(false),
        );
        let context = policy.open(None);

        policy.register_fault(&context, &fault());
        assert!(policy.can_retry(&context));

        policy.register_fault(&context, &Fault::new(Fatal));
        assert!(!policy.can_retry(&context));
    }

    #[test]
    fn zero_max_attempts_is_exhausted_on_entry() {
        let policy = SimpleRetryPolicy::new(0);
        let context = policy.open(None);

        assert!(!policy.can_retry(&context));
    }

    #[test]
    fn not_recoverable_faults_set_the_no_recovery_attribute() {
        let policy = SimpleRetryPolicy::new(1)
            .not_recoverable(BinaryErrorClassifier::new(false).with_rule::<Fatal>(true));
        let context = policy.open(None);

        policy.register_fault(&context, &Fault::new(Fatal));
        assert!(!policy.can_retry(&context));
        assert!(context.flag(keys::NO_RECOVERY));

        // A recoverable fault clears the marker again.
        policy.register_fault(&context, &fault());
        assert!(!policy.can_retry(&context));
        assert!(!context.flag(keys::NO_RECOVERY));
    }

    #[test]
    fn supplier_bound_is_re_read() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let bound = Arc::new(AtomicU32::new(1));
        let bound_clone = Arc::clone(&bound);
        let policy = SimpleRetryPolicy::default()
            .max_attempts_supplier(Supplier::from_fn(move || bound_clone.load(Ordering::SeqCst)));
        let context = policy.open(None);

        policy.register_fault(&context, &fault());
        assert!(!policy.can_retry(&context));

        bound.store(5, Ordering::SeqCst);
        assert!(policy.can_retry(&context));
    }
}
