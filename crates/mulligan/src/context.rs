// Copyright (c) Microsoft Corporation.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use triage::Fault;

/// Well-known context attribute keys.
///
/// The attribute bag is open: callers, listeners, and policies may store
/// anything under any key. The keys below have engine-assigned meanings and
/// are written or read by the engine itself.
pub mod keys {
    /// A display name for the operation, set by adapters for diagnostics.
    pub const NAME: &str = "context.name";

    /// The [`RetryKey`][crate::RetryKey] of a stateful execution.
    pub const STATE: &str = "context.state";

    /// Set to `true` when the context has been closed.
    pub const CLOSED: &str = "context.closed";

    /// Set to `true` when a recovery function produced the result.
    pub const RECOVERED: &str = "context.recovered";

    /// Set to `true` when attempts were exhausted.
    pub const EXHAUSTED: &str = "context.exhausted";

    /// Set to `true` by a policy to suppress recovery for the last fault.
    pub const NO_RECOVERY: &str = "context.no-recovery";

    /// The policy's attempt bound, published for observers.
    pub const MAX_ATTEMPTS: &str = "context.max-attempts";

    /// Marks a context that must survive in the cache across invocations
    /// (used by the circuit-breaker policy).
    pub const GLOBAL_STATE: &str = "state.global";

    /// Set to `true` while the circuit-breaker refuses attempts.
    pub const CIRCUIT_OPEN: &str = "circuit.open";

    /// Number of calls short-circuited by an open circuit-breaker (`u64`).
    pub const CIRCUIT_SHORT_COUNT: &str = "circuit.shortCount";

    /// The [`BackOffContext`][crate::backoff::BackOffContext] carried across
    /// stateful invocations.
    pub const BACKOFF_CONTEXT: &str = "backOffContext";

    /// The invocation arguments, set by the stateful adapter.
    pub const ARGS: &str = "ARGS";
}

/// A value stored in the context attribute bag.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Per-execution retry state: attempt count, last fault, and an open
/// attribute bag.
///
/// A context is created by a [`RetryPolicy`][crate::policy::RetryPolicy] when
/// an execution opens and closed when it exits. In stateful mode the same
/// context is cached and revisited by later invocations, so all state lives
/// behind interior mutability and contexts are shared as
/// `Arc<RetryContext>`.
///
/// The operation can read attributes left by policies and listeners, and can
/// force the attempt loop to end early via
/// [`set_exhausted_only`][Self::set_exhausted_only].
pub struct RetryContext {
    parent: Option<Arc<RetryContext>>,
    retry_count: AtomicU32,
    exhausted_only: AtomicBool,
    last_fault: Mutex<Option<Fault>>,
    attributes: Mutex<HashMap<Cow<'static, str>, AttributeValue>>,
}

impl RetryContext {
    /// Creates a context, optionally linked to the context of an enclosing
    /// retry execution.
    #[must_use]
    pub fn new(parent: Option<Arc<RetryContext>>) -> Self {
        Self {
            parent,
            retry_count: AtomicU32::new(0),
            exhausted_only: AtomicBool::new(false),
            last_fault: Mutex::new(None),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the enclosing execution's context, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<RetryContext>> {
        self.parent.as_ref()
    }

    /// Returns the number of faults recorded so far.
    ///
    /// The count is monotonically non-decreasing and equals the number of
    /// [`record_fault`][Self::record_fault] calls.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// Returns the most recently recorded fault, if any.
    #[must_use]
    pub fn last_fault(&self) -> Option<Fault> {
        self.last_fault.lock().clone()
    }

    /// Signals that the attempt loop must end after the current attempt.
    pub fn set_exhausted_only(&self) {
        self.exhausted_only.store(true, Ordering::SeqCst);
    }

    /// Returns true when the loop was asked to end early.
    #[must_use]
    pub fn exhausted_only(&self) -> bool {
        self.exhausted_only.load(Ordering::SeqCst)
    }

    /// Records a fault: stores it as the last fault and increments the retry
    /// count exactly once.
    pub fn record_fault(&self, fault: Fault) {
        *self.last_fault.lock() = Some(fault);
        self.retry_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_attribute(&self, key: impl Into<Cow<'static, str>>, value: impl Any + Send + Sync) {
        self.attributes.lock().insert(key.into(), Arc::new(value));
    }

    /// Returns the value stored under `key`, if present and of type `T`.
    #[must_use]
    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.attributes.lock().get(key)?);
        value.downcast().ok()
    }

    /// Removes the value stored under `key`. Returns true when a value was
    /// present.
    pub fn remove_attribute(&self, key: &str) -> bool {
        self.attributes.lock().remove(key).is_some()
    }

    /// Returns true when a value is stored under `key`.
    #[must_use]
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    /// Returns true when `key` holds the boolean `true`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.attribute::<bool>(key).is_some_and(|value| *value)
    }
}

impl Debug for RetryContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("retry_count", &self.retry_count())
            .field("exhausted_only", &self.exhausted_only())
            .field("last_fault", &self.last_fault())
            .field("has_parent", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}
