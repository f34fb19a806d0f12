// Copyright (c) Microsoft Corporation.

use triage::Fault;

use crate::context::RetryContext;

/// Hooks invoked synchronously around retry attempts, on the caller's thread.
///
/// All hooks have no-op defaults, so implementations override only what they
/// need. When multiple listeners are registered, `open` runs in registration
/// order while `on_error`, `on_success`, and `close` run in reverse
/// registration order, mirroring nested scopes.
///
/// The engine does not catch panics from listeners; keeping hooks infallible
/// is the implementer's responsibility.
///
/// # Examples
///
/// ```rust
/// use mulligan::{RetryContext, RetryListener};
/// use mulligan::Fault;
///
/// #[derive(Debug)]
/// struct LogAttempts;
///
/// impl RetryListener for LogAttempts {
///     fn on_error(&self, context: &RetryContext, fault: &Fault) {
///         eprintln!("attempt {} failed: {fault}", context.retry_count());
///     }
/// }
/// ```
pub trait RetryListener: Send + Sync {
    /// Called once before the first attempt.
    ///
    /// Returning `false` from any listener aborts the execution with a
    /// terminated-retry error before the operation runs.
    fn open(&self, context: &RetryContext) -> bool {
        let _ = context;
        true
    }

    /// Called after a successful attempt, before the engine returns.
    fn on_success(&self, context: &RetryContext) {
        let _ = context;
    }

    /// Called after each failed attempt, before the backoff sleep.
    fn on_error(&self, context: &RetryContext, fault: &Fault) {
        let _ = (context, fault);
    }

    /// Called exactly once after the attempt loop exits, whether by success,
    /// exhaustion, or abort. `last_fault` is the error of the final failed
    /// attempt, or `None` when the execution succeeded.
    fn close(&self, context: &RetryContext, last_fault: Option<&Fault>) {
        let _ = (context, last_fault);
    }
}
