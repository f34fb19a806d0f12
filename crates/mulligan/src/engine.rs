// Copyright (c) Microsoft Corporation.

use std::error::Error;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use triage::{BinaryErrorClassifier, Fault};

use crate::backoff::{BackOffContext, BackOffPolicy, NoBackOffPolicy};
use crate::cache::{InMemoryRetryContextCache, RetryContextCache};
use crate::context::{RetryContext, keys};
use crate::error::RetryError;
use crate::listener::RetryListener;
use crate::policy::{RetryPolicy, SimpleRetryPolicy};
use crate::registry;
use crate::state::RetryState;

/// The retry execution engine.
///
/// An engine owns a retry policy, a backoff policy, listeners, and a context
/// cache, and runs user operations through the attempt loop: consult the
/// policy, run the operation, record failures, pause, and repeat until
/// success, exhaustion, or abort. Engines are immutable and safe to share
/// across threads; each execution gets its own context.
///
/// Construct engines with [`RetryEngine::builder`]. For the stateful
/// protocol (contexts cached by key across invocations, rollback rethrow),
/// pass a [`RetryState`] to [`execute_stateful`][Self::execute_stateful], or
/// use the [`StatefulRetry`][crate::StatefulRetry] adapter.
///
/// # Examples
///
/// ```rust
/// use mulligan::RetryEngine;
///
/// let engine = RetryEngine::builder().max_attempts(2).build();
///
/// let mut calls = 0;
/// let result = engine.execute(|_context| {
///     calls += 1;
///     Err::<(), _>(std::io::Error::other("always fails"))
/// });
///
/// assert_eq!(calls, 2);
/// assert!(result.is_err());
/// ```
pub struct RetryEngine {
    policy: Arc<dyn RetryPolicy>,
    backoff: Arc<dyn BackOffPolicy>,
    listeners: Vec<Arc<dyn RetryListener>>,
    cache: Arc<dyn RetryContextCache>,
    throw_last_fault_on_exhausted: bool,
    use_thread_local: bool,
}

/// What the attempt loop decided, before exhaustion handling.
enum LoopOutcome<T, E> {
    Success(T),
    Abort(RetryError<E>),
    Exhausted,
}

impl RetryEngine {
    /// Starts configuring an engine.
    #[must_use]
    pub fn builder() -> RetryEngineBuilder {
        RetryEngineBuilder::default()
    }

    /// Executes `operation`, retrying per the configured policies.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`RetryError`]: the operation's own error once
    /// retries are exhausted or refused, or one of the engine's abort
    /// conditions.
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        self.do_execute(operation, None::<fn(&RetryContext) -> Result<T, E>>, None)
    }

    /// Executes `operation`; when attempts are exhausted, `recovery` produces
    /// the result instead.
    ///
    /// # Errors
    ///
    /// Returns the recovery function's error, raw, when recovery itself
    /// fails; otherwise as [`execute`][Self::execute].
    pub fn execute_with_recovery<T, E, F, R>(
        &self,
        operation: F,
        recovery: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        R: FnOnce(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        self.do_execute(operation, Some(recovery), None)
    }

    /// Executes `operation` statefully: the context is cached under
    /// `state`'s key across invocations, and faults classified for rollback
    /// are rethrown to the caller while attempts remain.
    ///
    /// # Errors
    ///
    /// As [`execute`][Self::execute], plus [`RetryError::Exhausted`] when
    /// attempts run out with no recovery, and cache-related errors.
    pub fn execute_stateful<T, E, F>(
        &self,
        operation: F,
        state: &RetryState,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        self.do_execute(operation, None::<fn(&RetryContext) -> Result<T, E>>, Some(state))
    }

    /// Stateful execution with a recovery function.
    ///
    /// # Errors
    ///
    /// As [`execute_stateful`][Self::execute_stateful]; recovery errors are
    /// propagated raw.
    pub fn execute_stateful_with_recovery<T, E, F, R>(
        &self,
        operation: F,
        recovery: R,
        state: &RetryState,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        R: FnOnce(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        self.do_execute(operation, Some(recovery), Some(state))
    }

    fn do_execute<T, E, F, R>(
        &self,
        mut operation: F,
        recovery: Option<R>,
        state: Option<&RetryState>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        R: FnOnce(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        let context = self.open_context(state)?;
        tracing::trace!(retry_count = context.retry_count(), "retry: execution starting");

        let previous = registry::register(Arc::clone(&context), self.use_thread_local);

        let mut last_typed: Option<Arc<E>> = None;
        let mut last_fault: Option<Fault> = None;
        let mut exhausted = false;

        let result = match self.attempt_loop(&context, &mut operation, state, &mut last_typed, &mut last_fault)
        {
            LoopOutcome::Success(value) => Ok(value),
            LoopOutcome::Abort(error) => Err(error),
            LoopOutcome::Exhausted => {
                exhausted = true;
                self.handle_exhausted(recovery, &context, state, last_typed.take())
            }
        };

        let succeeded = last_fault.is_none() || exhausted;
        self.close_context(&context, state, succeeded);
        for listener in self.listeners.iter().rev() {
            listener.close(&context, last_fault.as_ref());
        }
        registry::restore(previous, self.use_thread_local);

        result
    }

    fn attempt_loop<T, E, F>(
        &self,
        context: &Arc<RetryContext>,
        operation: &mut F,
        state: Option<&RetryState>,
        last_typed: &mut Option<Arc<E>>,
        last_fault: &mut Option<Fault>,
    ) -> LoopOutcome<T, E>
    where
        F: FnMut(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        for listener in &self.listeners {
            if !listener.open(context) {
                tracing::debug!("retry: execution vetoed by an open listener");
                return LoopOutcome::Abort(RetryError::Terminated);
            }
        }

        if !context.has_attribute(keys::MAX_ATTEMPTS) {
            if let Some(max_attempts) = self.policy.max_attempts() {
                context.set_attribute(keys::MAX_ATTEMPTS, max_attempts);
            }
        }

        let backoff_context = match context.attribute::<BackOffContext>(keys::BACKOFF_CONTEXT) {
            Some(carried) => Some(carried.as_ref().clone()),
            None => {
                let started = self.backoff.start(context);
                if let Some(started) = &started {
                    context.set_attribute(keys::BACKOFF_CONTEXT, started.clone());
                }
                started
            }
        };

        while self.policy.can_retry(context) && !context.exhausted_only() {
            tracing::trace!(retry_count = context.retry_count(), "retry: attempt");

            match operation(context) {
                Ok(value) => {
                    *last_typed = None;
                    *last_fault = None;
                    for listener in self.listeners.iter().rev() {
                        listener.on_success(context);
                    }
                    return LoopOutcome::Success(value);
                }
                Err(error) => {
                    let shared = Arc::new(error);
                    let fault = Fault::from_arc(Arc::clone(&shared));
                    *last_typed = Some(Arc::clone(&shared));
                    *last_fault = Some(fault.clone());

                    self.policy.register_fault(context, &fault);
                    if let Err(error) = self.register_context(context, state) {
                        return LoopOutcome::Abort(error);
                    }

                    for listener in self.listeners.iter().rev() {
                        listener.on_error(context, &fault);
                    }

                    let can_retry = self.policy.can_retry(context) && !context.exhausted_only();
                    if can_retry {
                        if let Err(interrupted) = self.backoff.back_off(backoff_context.as_ref()) {
                            tracing::debug!("retry: backoff interrupted, aborting");
                            return LoopOutcome::Abort(RetryError::Interrupted(interrupted));
                        }
                    }

                    // Rollback protocol: while attempts remain, hand the
                    // fault back to the caller and let the next invocation
                    // resume from the cached context.
                    if can_retry && state.is_some_and(|state| state.rollback_for(&fault)) {
                        tracing::debug!(fault = %fault, "retry: rethrowing for rollback");
                        return LoopOutcome::Abort(RetryError::Operation(shared));
                    }
                }
            }

            // A global-state context (circuit breaker) owns reattempt timing
            // across invocations; its failures exit the in-stack loop.
            if state.is_some() && context.flag(keys::GLOBAL_STATE) {
                break;
            }
        }

        LoopOutcome::Exhausted
    }

    fn handle_exhausted<T, E, R>(
        &self,
        recovery: Option<R>,
        context: &Arc<RetryContext>,
        state: Option<&RetryState>,
        last_typed: Option<Arc<E>>,
    ) -> Result<T, RetryError<E>>
    where
        R: FnOnce(&RetryContext) -> Result<T, E>,
        E: Error + Send + Sync + 'static,
    {
        context.set_attribute(keys::EXHAUSTED, true);
        if let Some(state) = state {
            if !context.flag(keys::GLOBAL_STATE) {
                self.cache.remove(state.key());
            }
        }

        if let Some(recovery) = recovery {
            if context.flag(keys::NO_RECOVERY) {
                tracing::debug!("retry: exhausted, recovery suppressed for the last fault");
            } else {
                tracing::debug!(retry_count = context.retry_count(), "retry: exhausted, recovering");
                let value =
                    recovery(context).map_err(|error| RetryError::Operation(Arc::new(error)))?;
                context.set_attribute(keys::RECOVERED, true);
                return Ok(value);
            }
        }

        tracing::debug!(retry_count = context.retry_count(), "retry: exhausted, no recovery");
        if state.is_none() || self.throw_last_fault_on_exhausted {
            match last_typed {
                Some(error) => Err(RetryError::Operation(error)),
                None => Err(RetryError::Exhausted { last: None }),
            }
        } else {
            Err(RetryError::Exhausted { last: last_typed })
        }
    }

    fn open_context<E>(&self, state: Option<&RetryState>) -> Result<Arc<RetryContext>, RetryError<E>> {
        let parent = registry::current_context();
        let Some(state) = state else {
            return Ok(self.policy.open(parent.as_ref()));
        };

        if state.is_force_refresh() || !self.cache.contains(state.key()) {
            return self.open_fresh(parent.as_ref(), state);
        }

        match self.cache.get(state.key()) {
            Some(context) => {
                context.remove_attribute(keys::CLOSED);
                context.remove_attribute(keys::EXHAUSTED);
                context.remove_attribute(keys::RECOVERED);
                tracing::trace!(retry_count = context.retry_count(), "retry: resuming cached context");
                Ok(context)
            }
            // A concurrent removal between contains() and get() is benign;
            // a key that is still present but unreadable is not.
            None if self.cache.contains(state.key()) => Err(RetryError::InconsistentCache),
            None => self.open_fresh(parent.as_ref(), state),
        }
    }

    fn open_fresh<E>(
        &self,
        parent: Option<&Arc<RetryContext>>,
        state: &RetryState,
    ) -> Result<Arc<RetryContext>, RetryError<E>> {
        let context = self.policy.open(parent);
        context.set_attribute(keys::STATE, state.key().clone());
        if context.flag(keys::GLOBAL_STATE) {
            self.register_context(&context, Some(state))?;
        }
        Ok(context)
    }

    fn register_context<E>(
        &self,
        context: &Arc<RetryContext>,
        state: Option<&RetryState>,
    ) -> Result<(), RetryError<E>> {
        let Some(state) = state else { return Ok(()) };
        self.cache
            .put(state.key().clone(), Arc::clone(context))
            .map_err(RetryError::CacheCapacity)
    }

    fn close_context(&self, context: &Arc<RetryContext>, state: Option<&RetryState>, succeeded: bool) {
        if let Some(state) = state {
            if succeeded {
                if !context.flag(keys::GLOBAL_STATE) {
                    self.cache.remove(state.key());
                }
                self.policy.close(context);
                context.set_attribute(keys::CLOSED, true);
            }
        } else {
            self.policy.close(context);
            context.set_attribute(keys::CLOSED, true);
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Debug for RetryEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .field("listeners", &self.listeners.len())
            .field("throw_last_fault_on_exhausted", &self.throw_last_fault_on_exhausted)
            .field("use_thread_local", &self.use_thread_local)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`RetryEngine`].
///
/// Without any configuration, the engine uses a
/// [`SimpleRetryPolicy`] with 3 attempts, no backoff, no listeners, and an
/// in-memory context cache.
///
/// The classification conveniences ([`retry_for`][Self::retry_for],
/// [`no_retry_for`][Self::no_retry_for],
/// [`not_recoverable`][Self::not_recoverable],
/// [`traverse_causes`][Self::traverse_causes]) and
/// [`max_attempts`][Self::max_attempts] configure the built-in simple
/// policy; installing an explicit [`retry_policy`][Self::retry_policy]
/// overrides all of them.
pub struct RetryEngineBuilder {
    policy: Option<Arc<dyn RetryPolicy>>,
    max_attempts: u32,
    retryable: BinaryErrorClassifier,
    has_includes: bool,
    not_recoverable: Option<BinaryErrorClassifier>,
    traverse_causes: bool,
    backoff: Arc<dyn BackOffPolicy>,
    listeners: Vec<Arc<dyn RetryListener>>,
    cache: Arc<dyn RetryContextCache>,
    throw_last_fault_on_exhausted: bool,
    use_thread_local: bool,
}

impl Default for RetryEngineBuilder {
    fn default() -> Self {
        Self {
            policy: None,
            max_attempts: crate::policy::DEFAULT_MAX_ATTEMPTS,
            retryable: BinaryErrorClassifier::new(true),
            has_includes: false,
            not_recoverable: None,
            traverse_causes: false,
            backoff: Arc::new(NoBackOffPolicy),
            listeners: Vec::new(),
            cache: Arc::new(InMemoryRetryContextCache::new()),
            throw_last_fault_on_exhausted: false,
            use_thread_local: true,
        }
    }
}

impl RetryEngineBuilder {
    /// Installs an explicit retry policy, overriding `max_attempts` and the
    /// classification conveniences.
    #[must_use]
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Sets the attempt bound of the built-in simple policy (including the
    /// initial attempt).
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Retries only errors of type `E` (and any other types passed to this
    /// method); everything else becomes terminal on first failure.
    #[must_use]
    pub fn retry_for<E: Error + 'static>(mut self) -> Self {
        self.has_includes = true;
        self.retryable = self.retryable.with_rule::<E>(true);
        self
    }

    /// Makes errors of type `E` terminal on first failure.
    #[must_use]
    pub fn no_retry_for<E: Error + 'static>(mut self) -> Self {
        self.retryable = self.retryable.with_rule::<E>(false);
        self
    }

    /// Suppresses recovery when the terminal fault is of type `E`.
    #[must_use]
    pub fn not_recoverable<E: Error + 'static>(mut self) -> Self {
        let classifier = self
            .not_recoverable
            .take()
            .unwrap_or_else(|| BinaryErrorClassifier::new(false));
        self.not_recoverable = Some(classifier.with_rule::<E>(true));
        self
    }

    /// Classifies by walking error cause chains when the outermost type has
    /// no registered rule.
    #[must_use]
    pub fn traverse_causes(mut self, traverse_causes: bool) -> Self {
        self.traverse_causes = traverse_causes;
        self
    }

    /// Installs the backoff policy applied between attempts.
    #[must_use]
    pub fn backoff_policy(mut self, backoff: impl BackOffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Appends a listener. Listeners open in registration order and are
    /// notified of errors, successes, and closure in reverse order.
    #[must_use]
    pub fn listener(mut self, listener: impl RetryListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Replaces the context cache used by stateful executions.
    #[must_use]
    pub fn context_cache(mut self, cache: Arc<dyn RetryContextCache>) -> Self {
        self.cache = cache;
        self
    }

    /// On stateful exhaustion without recovery, rethrows the last fault raw
    /// instead of wrapping it in [`RetryError::Exhausted`].
    #[must_use]
    pub fn throw_last_fault_on_exhausted(mut self, throw_last: bool) -> Self {
        self.throw_last_fault_on_exhausted = throw_last;
        self
    }

    /// Selects how the current context is published: a true thread-local
    /// (default) or a process-wide thread-keyed map, which suits hosts with
    /// very many short-lived threads.
    #[must_use]
    pub fn use_thread_local(mut self, use_thread_local: bool) -> Self {
        self.use_thread_local = use_thread_local;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> RetryEngine {
        let policy = self.policy.unwrap_or_else(|| {
            let retryable = self
                .retryable
                .default_value(!self.has_includes)
                .traverse_causes(self.traverse_causes);
            let mut policy = SimpleRetryPolicy::with_classifier(self.max_attempts, retryable);
            if let Some(not_recoverable) = self.not_recoverable {
                policy = policy.not_recoverable(not_recoverable.traverse_causes(self.traverse_causes));
            }
            Arc::new(policy)
        });

        RetryEngine {
            policy,
            backoff: self.backoff,
            listeners: self.listeners,
            cache: self.cache,
            throw_last_fault_on_exhausted: self.throw_last_fault_on_exhausted,
            use_thread_local: self.use_thread_local,
        }
    }
}

impl Debug for RetryEngineBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngineBuilder")
            .field("max_attempts", &self.max_attempts)
            .field("has_explicit_policy", &self.policy.is_some())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
