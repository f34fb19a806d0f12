// Copyright (c) Microsoft Corporation.

use std::sync::Arc;

use triage::Fault;

use crate::context::RetryContext;
use crate::policy::RetryPolicy;

/// Attribute key holding the child contexts, parallel to the child policies.
const CHILD_CONTEXTS: &str = "composite.contexts";

/// Combines several policies into one decision.
///
/// In the default (pessimistic) mode every child must allow another attempt;
/// in optimistic mode a single willing child is enough. Each child gets its
/// own context, opened alongside the composite's and stored on it, so child
/// policies keep their own state. Fault registration and closing fan out to
/// every child.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use mulligan::policy::{CompositeRetryPolicy, MaxAttemptsRetryPolicy, RetryPolicy, TimeoutRetryPolicy};
///
/// // At most 5 attempts, and only within the first second.
/// let policy = CompositeRetryPolicy::new()
///     .policy(MaxAttemptsRetryPolicy::new(5))
///     .policy(TimeoutRetryPolicy::new(Duration::from_secs(1)));
///
/// let context = policy.open(None);
/// assert!(policy.can_retry(&context));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CompositeRetryPolicy {
    policies: Vec<Arc<dyn RetryPolicy>>,
    optimistic: bool,
}

impl CompositeRetryPolicy {
    /// Creates an empty composite in pessimistic (all-must-allow) mode.
    ///
    /// An empty pessimistic composite allows retrying forever; combine it
    /// with at least one bounding child.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child policy.
    #[must_use]
    pub fn policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Switches between optimistic (any child allows) and pessimistic (all
    /// children must allow) combination.
    #[must_use]
    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    fn children(context: &RetryContext) -> Option<Arc<Vec<Arc<RetryContext>>>> {
        context.attribute::<Vec<Arc<RetryContext>>>(CHILD_CONTEXTS)
    }
}

impl RetryPolicy for CompositeRetryPolicy {
    fn open(&self, parent: Option<&Arc<RetryContext>>) -> Arc<RetryContext> {
        let context = Arc::new(RetryContext::new(parent.cloned()));
        let children: Vec<Arc<RetryContext>> =
            self.policies.iter().map(|policy| policy.open(parent)).collect();
        context.set_attribute(CHILD_CONTEXTS, children);
        context
    }

    fn can_retry(&self, context: &RetryContext) -> bool {
        let Some(children) = Self::children(context) else {
            return false;
        };

        let mut votes = self.policies.iter().zip(children.iter());
        if self.optimistic {
            votes.any(|(policy, child)| policy.can_retry(child))
        } else {
            votes.all(|(policy, child)| policy.can_retry(child))
        }
    }

    fn register_fault(&self, context: &RetryContext, fault: &Fault) {
        if let Some(children) = Self::children(context) {
            for (policy, child) in self.policies.iter().zip(children.iter()) {
                policy.register_fault(child, fault);
            }
        }
        context.record_fault(fault.clone());
    }

    fn close(&self, context: &RetryContext) {
        if let Some(children) = Self::children(context) {
            for (policy, child) in self.policies.iter().zip(children.iter()) {
                policy.close(child);
            }
        }
    }

    fn max_attempts(&self) -> Option<u32> {
        let bounds = self.policies.iter().filter_map(|policy| policy.max_attempts());
        if self.optimistic {
            bounds.max()
        } else {
            bounds.min()
        }
    }
}
