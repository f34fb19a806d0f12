// Copyright (c) Microsoft Corporation.

use std::borrow::Cow;
use std::error::Error;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use triage::{BinaryErrorClassifier, Fault};

use crate::context::{RetryContext, keys};
use crate::engine::RetryEngine;
use crate::error::RetryError;
use crate::state::{RetryKey, RetryState};

/// Adapts per-call invocations into key-addressable stateful retry.
///
/// Where [`RetryEngine::execute_stateful`] expects the caller to manage a
/// [`RetryState`], this adapter derives one from the invocation arguments: a
/// key generator identifies the logical operation, the key is qualified with
/// a call-site label so different adapters sharing a cache cannot collide,
/// and an optional recovery handler receives the original arguments together
/// with the last fault once attempts are exhausted.
///
/// By default every fault rolls back (is rethrown to the caller so the
/// surrounding transaction can unwind); a rollback classifier can downgrade
/// selected error types to in-stack retry.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use mulligan::{RetryEngine, RetryKey, StatefulRetry};
///
/// let engine = Arc::new(RetryEngine::builder().max_attempts(2).build());
/// let retry: StatefulRetry<u64, String, std::io::Error> =
///     StatefulRetry::new(Arc::clone(&engine), "load_order", |order_id| {
///         Some(RetryKey::new(*order_id))
///     })
///     .recovery(|order_id, _fault| Ok(format!("order {order_id} skipped")));
///
/// // First invocation fails and rolls back to the caller.
/// let first = retry.invoke(42, |_| Err(std::io::Error::other("db down")));
/// assert!(first.is_err());
///
/// // Second invocation with the same key exhausts the bound and recovers.
/// let second = retry.invoke(42, |_| Err(std::io::Error::other("db down")));
/// assert_eq!(second.unwrap(), "order 42 skipped");
/// ```
pub struct StatefulRetry<A, T, E> {
    engine: Arc<RetryEngine>,
    label: Cow<'static, str>,
    key_generator: Arc<dyn Fn(&A) -> Option<RetryKey> + Send + Sync>,
    refresh_when: Option<Arc<dyn Fn(&A) -> bool + Send + Sync>>,
    recovery: Option<Arc<dyn Fn(&A, Option<&Fault>) -> Result<T, E> + Send + Sync>>,
    rollback_classifier: Option<BinaryErrorClassifier>,
    use_raw_key: bool,
}

impl<A, T, E> StatefulRetry<A, T, E>
where
    A: Send + Sync + 'static,
    E: Error + Send + Sync + 'static,
{
    /// Creates an adapter over `engine`.
    ///
    /// `label` names the call site; it qualifies cache keys and is published
    /// on the context under [`context.name`][keys::NAME]. `key_generator`
    /// derives the retry key from the invocation arguments; returning `None`
    /// disables retry for that invocation.
    pub fn new<K>(
        engine: Arc<RetryEngine>,
        label: impl Into<Cow<'static, str>>,
        key_generator: K,
    ) -> Self
    where
        K: Fn(&A) -> Option<RetryKey> + Send + Sync + 'static,
    {
        Self {
            engine,
            label: label.into(),
            key_generator: Arc::new(key_generator),
            refresh_when: None,
            recovery: None,
            rollback_classifier: None,
            use_raw_key: false,
        }
    }

    /// Installs a detector for arguments that represent a new logical
    /// operation; when it returns true the cached context for the key is
    /// abandoned and a fresh one opened.
    #[must_use]
    pub fn refresh_when<N>(mut self, refresh_when: N) -> Self
    where
        N: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.refresh_when = Some(Arc::new(refresh_when));
        self
    }

    /// Installs the recovery handler invoked with the original arguments and
    /// the last fault once attempts are exhausted.
    #[must_use]
    pub fn recovery<R>(mut self, recovery: R) -> Self
    where
        R: Fn(&A, Option<&Fault>) -> Result<T, E> + Send + Sync + 'static,
    {
        self.recovery = Some(Arc::new(recovery));
        self
    }

    /// Installs the classifier deciding which faults roll back; unclassified
    /// behavior follows the classifier's default.
    #[must_use]
    pub fn rollback_classifier(mut self, classifier: BinaryErrorClassifier) -> Self {
        self.rollback_classifier = Some(classifier);
        self
    }

    /// Uses the generated key as-is instead of qualifying it with the label.
    ///
    /// Only safe when the caller guarantees keys are unique across all call
    /// sites sharing the engine's cache.
    #[must_use]
    pub fn use_raw_key(mut self, use_raw_key: bool) -> Self {
        self.use_raw_key = use_raw_key;
        self
    }

    /// Runs one invocation of `operation` under the stateful protocol.
    ///
    /// # Errors
    ///
    /// Faults classified for rollback are returned as
    /// [`RetryError::Operation`] so the caller's transaction can unwind;
    /// exhaustion without recovery yields [`RetryError::Exhausted`].
    pub fn invoke<F>(&self, args: A, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(&A) -> Result<T, E>,
    {
        let Some(key) = (self.key_generator)(&args) else {
            // No key: retry is disabled, run the operation exactly once.
            return operation(&args).map_err(|error| RetryError::Operation(Arc::new(error)));
        };

        let key = if self.use_raw_key {
            key
        } else {
            RetryKey::qualified(self.label.clone(), key)
        };

        let force_refresh = self.refresh_when.as_ref().is_some_and(|is_new| is_new(&args));
        let mut state = RetryState::new(key).force_refresh(force_refresh);
        if let Some(classifier) = &self.rollback_classifier {
            state = state.rollback_classifier(classifier.clone());
        }

        let args = Arc::new(args);
        let operation_args = Arc::clone(&args);
        let label = self.label.clone();
        let operation = move |context: &RetryContext| {
            if !context.has_attribute(keys::NAME) {
                context.set_attribute(keys::NAME, label.clone());
                context.set_attribute(keys::ARGS, Arc::clone(&operation_args));
            }
            operation(&operation_args)
        };

        match &self.recovery {
            Some(recovery) => {
                let recovery = Arc::clone(recovery);
                let recovery_args = Arc::clone(&args);
                self.engine.execute_stateful_with_recovery(
                    operation,
                    move |context: &RetryContext| {
                        let fault = context.last_fault();
                        recovery(&recovery_args, fault.as_ref())
                    },
                    &state,
                )
            }
            None => self.engine.execute_stateful(operation, &state),
        }
    }
}

impl<A, T, E> Debug for StatefulRetry<A, T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulRetry")
            .field("label", &self.label)
            .field("has_recovery", &self.recovery.is_some())
            .field("use_raw_key", &self.use_raw_key)
            .finish_non_exhaustive()
    }
}
