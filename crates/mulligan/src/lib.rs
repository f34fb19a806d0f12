// Copyright (c) Microsoft Corporation.

//! Synchronous retry engine with pluggable policies, backoff strategies,
//! listener hooks, and stateful recovery.
//!
//! The [`RetryEngine`] executes a fallible operation, consults a
//! [retry policy][policy::RetryPolicy] to decide whether to try again,
//! consults a [backoff policy][backoff::BackOffPolicy] to decide how long to
//! pause between attempts, and, when attempts are exhausted, optionally
//! invokes a recovery function. Execution is synchronous by contract: the
//! attempt loop runs on the caller's thread and the only blocking point is
//! the backoff sleep.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use mulligan::RetryEngine;
//! use mulligan::backoff::FixedBackOffPolicy;
//!
//! let engine = RetryEngine::builder()
//!     .max_attempts(3)
//!     .backoff_policy(FixedBackOffPolicy::new(Duration::from_millis(10)))
//!     .build();
//!
//! let mut calls = 0;
//! let result = engine.execute(|_context| {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(std::io::Error::other("transient"))
//!     } else {
//!         Ok("done")
//!     }
//! });
//!
//! assert_eq!(result.unwrap(), "done");
//! assert_eq!(calls, 3);
//! ```
//!
//! # Stateful retry
//!
//! Supplying a [`RetryState`] keys the retry context and caches it across
//! separate top-level invocations, so the same logical failure can be
//! retried across transactional boundaries: a fault classified for rollback
//! is rethrown to the caller, and the next invocation with the same
//! [`RetryKey`] resumes from the cached context. The [`StatefulRetry`]
//! adapter derives the state from invocation arguments and adds an
//! argument-aware recovery handler.
//!
//! # Classification
//!
//! Decisions about *which* errors retry, roll back, or recover are driven by
//! [`BinaryErrorClassifier`] over type-erased [`Fault`]s (re-exported from
//! the `triage` crate). The engine builder offers shorthand for the common
//! cases ([`retry_for`][RetryEngineBuilder::retry_for],
//! [`no_retry_for`][RetryEngineBuilder::no_retry_for],
//! [`not_recoverable`][RetryEngineBuilder::not_recoverable]).
//!
//! # Defaults
//!
//! | Parameter | Default | Configured by |
//! |-----------|---------|---------------|
//! | Max attempts | `3` (including the first) | [`RetryEngineBuilder::max_attempts`] |
//! | Retry policy | [`SimpleRetryPolicy`][policy::SimpleRetryPolicy] | [`RetryEngineBuilder::retry_policy`] |
//! | Backoff | none | [`RetryEngineBuilder::backoff_policy`] |
//! | Fixed backoff period | 1 s | [`backoff::FixedBackOffPolicy`] |
//! | Uniform backoff bounds | 500–1500 ms | [`backoff::UniformRandomBackOffPolicy`] |
//! | Exponential backoff | 100 ms × 2.0, capped at 30 s | [`backoff::ExponentialBackOffPolicy`] |
//! | Context cache capacity | 4096 | [`InMemoryRetryContextCache::with_capacity`] |
//! | Circuit breaker windows | open 5 s, reset 20 s | [`policy::CircuitBreakerRetryPolicy`] |
//!
//! # Observability
//!
//! The engine and the circuit-breaker policy emit `tracing` events (`trace`
//! for attempts and context lifecycle, `debug` for rollback rethrow,
//! recovery, and exhaustion), and the active context is always reachable via
//! [`current_context`] from code running inside an execution.

pub mod backoff;
mod cache;
mod context;
mod engine;
mod error;
mod listener;
pub mod policy;
mod registry;
mod rnd;
mod sleeper;
mod state;
mod stateful;
mod supplier;

#[doc(inline)]
pub use triage::{BinaryErrorClassifier, Fault};

pub use cache::{DEFAULT_CACHE_CAPACITY, InMemoryRetryContextCache, RetryContextCache};
pub use context::{AttributeValue, RetryContext, keys};
pub use engine::{RetryEngine, RetryEngineBuilder};
pub use error::{CacheCapacityExceeded, RetryError, SleepInterrupted};
pub use listener::RetryListener;
pub use registry::current_context;
pub use sleeper::{RecordingSleeper, Sleeper, ThreadSleeper};
pub use state::{RetryKey, RetryState};
pub use stateful::StatefulRetry;
pub use supplier::Supplier;
