// Copyright (c) Microsoft Corporation.

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

/// The ways a retried execution can terminate without producing a value.
///
/// `E` is the error type of the operation being retried. The last operation
/// error is held behind an [`Arc`] because the retry context keeps an erased
/// clone of it for listeners and, in stateful mode, for later invocations.
#[derive(Debug)]
#[non_exhaustive]
pub enum RetryError<E> {
    /// The operation's terminal error, returned with its identity preserved.
    ///
    /// Produced when a failure is classified non-retryable (stateless mode),
    /// when a stateful execution rethrows for rollback, when
    /// `throw_last_fault_on_exhausted` is enabled, and for errors returned by
    /// a recovery function.
    Operation(Arc<E>),

    /// Attempts were exhausted and no recovery produced a value.
    ///
    /// `last` is `None` when the policy rejected retrying before any attempt
    /// was made (for example `max_attempts = 0`).
    Exhausted {
        /// The error of the final attempt, if one was made.
        last: Option<Arc<E>>,
    },

    /// An open listener vetoed the execution before any attempt was made.
    Terminated,

    /// A backoff sleep was interrupted; retrying was aborted.
    Interrupted(SleepInterrupted),

    /// The retry context cache refused to store a context.
    CacheCapacity(CacheCapacityExceeded),

    /// The context cache reported a key as present but could not produce a
    /// context for it, repeatedly. This indicates broken key equality or
    /// hashing on the caller's side.
    InconsistentCache,
}

impl<E> RetryError<E> {
    /// Returns the last operation error carried by this value, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) | Self::Exhausted { last: Some(error) } => Some(error.as_ref()),
            _ => None,
        }
    }

    /// Returns true when attempts were exhausted without recovery.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(error) => Display::fmt(error, f),
            Self::Exhausted { last: Some(error) } => {
                write!(f, "retry attempts exhausted; last failure: {error}")
            }
            Self::Exhausted { last: None } => {
                write!(f, "retry attempts exhausted before any attempt was made")
            }
            Self::Terminated => write!(f, "retry terminated by an open listener"),
            Self::Interrupted(error) => Display::fmt(error, f),
            Self::CacheCapacity(error) => Display::fmt(error, f),
            Self::InconsistentCache => write!(
                f,
                "inconsistent retry state: no context found for a previously failed key; \
                 check that the key's equality and hashing are stable"
            ),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Operation(error) => error.source(),
            Self::Exhausted { last: Some(error) } => Some(error.as_ref()),
            Self::Interrupted(error) => Some(error),
            Self::CacheCapacity(error) => Some(error),
            Self::Exhausted { last: None } | Self::Terminated | Self::InconsistentCache => None,
        }
    }
}

/// A sleep was cut short by the host's cancellation mechanism.
///
/// [`ThreadSleeper`][crate::ThreadSleeper] never produces this; custom
/// sleepers that support cancellation report it to abort retrying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepInterrupted;

impl Display for SleepInterrupted {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "backoff sleep was interrupted")
    }
}

impl Error for SleepInterrupted {}

/// A context cache `put` would have grown the cache past its capacity.
///
/// In a correctly keyed stateful setup, entries are removed on success and on
/// exhaustion, so hitting the capacity usually means keys never repeat and
/// stateful retry is misconfigured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheCapacityExceeded {
    /// The configured capacity that would have been exceeded.
    pub capacity: usize,
}

impl Display for CacheCapacityExceeded {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "retry context cache capacity of {} exceeded", self.capacity)
    }
}

impl Error for CacheCapacityExceeded {}
