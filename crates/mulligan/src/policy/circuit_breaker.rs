// Copyright (c) Microsoft Corporation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use triage::Fault;

use crate::context::{RetryContext, keys};
use crate::policy::{RetryPolicy, SimpleRetryPolicy};
use crate::supplier::Supplier;

/// Attribute key holding the breaker's window state.
const CIRCUIT: &str = "circuit";

/// Default open window of [`CircuitBreakerRetryPolicy`].
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default reset window of [`CircuitBreakerRetryPolicy`].
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(20000);

/// Wraps a delegate policy with circuit-breaker semantics.
///
/// While the delegate keeps allowing attempts, the breaker stays closed and
/// the delegate decides. Once the delegate gives up within the open window
/// (failures arriving faster than `open_timeout`), the circuit opens: every
/// decision returns false, the [`circuit.open`][keys::CIRCUIT_OPEN] attribute
/// is set, and each short-circuited call increments
/// [`circuit.shortCount`][keys::CIRCUIT_SHORT_COUNT]. After `reset_timeout`
/// has elapsed, the next decision rebuilds the delegate's context and the
/// circuit closes again for a fresh window.
///
/// Contexts opened by this policy carry the
/// [`state.global`][keys::GLOBAL_STATE] marker: in stateful mode the engine
/// keeps them cached across invocations (even successful ones) and exits the
/// attempt loop after each failure, so reattempt timing is owned by the
/// breaker windows rather than the in-stack loop.
#[derive(Clone, Debug)]
pub struct CircuitBreakerRetryPolicy {
    delegate: Arc<dyn RetryPolicy>,
    open_timeout: Supplier<Duration>,
    reset_timeout: Supplier<Duration>,
}

struct CircuitState {
    /// Start of the current window; transitions reset it.
    window_start: Mutex<Instant>,
    /// The delegate's context for the current window.
    inner: Mutex<Arc<RetryContext>>,
    short_count: AtomicU64,
}

impl CircuitBreakerRetryPolicy {
    /// Wraps `delegate` with the default windows.
    #[must_use]
    pub fn new(delegate: impl RetryPolicy + 'static) -> Self {
        Self {
            delegate: Arc::new(delegate),
            open_timeout: DEFAULT_OPEN_TIMEOUT.into(),
            reset_timeout: DEFAULT_RESET_TIMEOUT.into(),
        }
    }

    /// Replaces the window within which delegate exhaustion opens the
    /// circuit.
    #[must_use]
    pub fn open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout.into();
        self
    }

    /// Replaces the window after which an open circuit closes again.
    #[must_use]
    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout.into();
        self
    }

    /// Replaces the open-window supplier; re-read on every decision.
    #[must_use]
    pub fn open_timeout_supplier(mut self, open_timeout: Supplier<Duration>) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Replaces the reset-window supplier; re-read on every decision.
    #[must_use]
    pub fn reset_timeout_supplier(mut self, reset_timeout: Supplier<Duration>) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }
}

impl Default for CircuitBreakerRetryPolicy {
    fn default() -> Self {
        Self::new(SimpleRetryPolicy::default())
    }
}

impl RetryPolicy for CircuitBreakerRetryPolicy {
    fn open(&self, parent: Option<&Arc<RetryContext>>) -> Arc<RetryContext> {
        let context = Arc::new(RetryContext::new(parent.cloned()));
        context.set_attribute(
            CIRCUIT,
            CircuitState {
                window_start: Mutex::new(Instant::now()),
                inner: Mutex::new(self.delegate.open(parent)),
                short_count: AtomicU64::new(0),
            },
        );
        context.set_attribute(keys::GLOBAL_STATE, true);
        context
    }

    fn can_retry(&self, context: &RetryContext) -> bool {
        let Some(state) = context.attribute::<CircuitState>(CIRCUIT) else {
            return self.delegate.can_retry(context);
        };

        // The window lock serializes transitions; decisions on a shared
        // breaker context observe them in order.
        let mut window_start = state.window_start.lock();
        let elapsed = window_start.elapsed();
        let mut inner = state.inner.lock();
        let mut retryable = self.delegate.can_retry(&inner);

        if retryable {
            if elapsed > self.open_timeout.get() {
                tracing::trace!("circuit breaker: resetting window");
                *inner = self.delegate.open(context.parent());
                *window_start = Instant::now();
            }
        } else if elapsed > self.reset_timeout.get() {
            tracing::trace!("circuit breaker: closing");
            *inner = self.delegate.open(context.parent());
            *window_start = Instant::now();
            retryable = self.delegate.can_retry(&inner);
        } else if elapsed < self.open_timeout.get() && !context.flag(keys::CIRCUIT_OPEN) {
            tracing::trace!("circuit breaker: opening");
            *window_start = Instant::now();
        }

        context.set_attribute(keys::CIRCUIT_OPEN, !retryable);
        if !retryable {
            let shorted = state.short_count.fetch_add(1, Ordering::SeqCst) + 1;
            context.set_attribute(keys::CIRCUIT_SHORT_COUNT, shorted);
        }

        retryable
    }

    fn register_fault(&self, context: &RetryContext, fault: &Fault) {
        if let Some(state) = context.attribute::<CircuitState>(CIRCUIT) {
            let inner = state.inner.lock();
            self.delegate.register_fault(&inner, fault);
        }
        context.record_fault(fault.clone());
    }

    fn close(&self, context: &RetryContext) {
        if let Some(state) = context.attribute::<CircuitState>(CIRCUIT) {
            let inner = state.inner.lock();
            self.delegate.close(&inner);
        }
    }

    fn max_attempts(&self) -> Option<u32> {
        self.delegate.max_attempts()
    }
}
