// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "This is a test module")]

//! Integration tests for the retry engine using only public API.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use mulligan::backoff::FixedBackOffPolicy;
use mulligan::{
    Fault, RecordingSleeper, RetryContext, RetryEngine, RetryError, RetryListener, Sleeper,
    current_context, keys,
};

#[derive(Debug)]
struct Transient(&'static str);

impl Display for Transient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "transient: {}", self.0)
    }
}

impl Error for Transient {}

#[derive(Debug)]
struct Fatal;

impl Display for Fatal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "fatal")
    }
}

impl Error for Fatal {}

#[derive(Debug)]
struct Wrapped(Box<dyn Error + Send + Sync>);

impl Display for Wrapped {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "wrapped: {}", self.0)
    }
}

impl Error for Wrapped {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Records every hook invocation into a shared event log.
#[derive(Debug)]
struct RecordingListener {
    name: &'static str,
    allow_open: bool,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    fn new(name: &'static str, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            allow_open: true,
            events,
        }
    }

    fn vetoing(name: &'static str, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            allow_open: false,
            events,
        }
    }

    fn push(&self, event: &str) {
        self.events.lock().unwrap().push(format!("{event}:{}", self.name));
    }
}

impl RetryListener for RecordingListener {
    fn open(&self, _context: &RetryContext) -> bool {
        self.push("open");
        self.allow_open
    }

    fn on_success(&self, _context: &RetryContext) {
        self.push("success");
    }

    fn on_error(&self, _context: &RetryContext, _fault: &Fault) {
        self.push("error");
    }

    fn close(&self, _context: &RetryContext, last_fault: Option<&Fault>) {
        self.push(if last_fault.is_some() { "close_err" } else { "close_ok" });
    }
}

#[test]
fn fixed_retry_eventual_success() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let engine = RetryEngine::builder()
        .max_attempts(3)
        .backoff_policy(FixedBackOffPolicy::new(Duration::from_millis(10)).sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>))
        .listener(RecordingListener::new("l", Arc::clone(&events)))
        .build();

    let calls = AtomicU32::new(0);
    let result = engine.execute(|_context| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(Transient("not yet"))
        } else {
            Ok(42)
        }
    });

    assert_eq!(result.expect("third attempt succeeds"), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        sleeper.durations(),
        vec![Duration::from_millis(10), Duration::from_millis(10)]
    );
    assert_eq!(
        *events.lock().unwrap(),
        ["open:l", "error:l", "error:l", "success:l", "close_ok:l"]
    );
}

#[test]
fn exhaustion_with_recovery() {
    let engine = RetryEngine::builder().max_attempts(2).build();

    let calls = AtomicU32::new(0);
    let observed = Arc::new(Mutex::new(None::<Arc<RetryContext>>));
    let observed_clone = Arc::clone(&observed);

    let result = engine.execute_with_recovery(
        move |_context| {
            calls.fetch_add(1, Ordering::SeqCst);
            *observed_clone.lock().unwrap() = current_context();
            Err::<&str, _>(Transient("still broken"))
        },
        |_context| Ok("recovered"),
    );

    assert_eq!(result.expect("recovery provides the value"), "recovered");

    let context = observed.lock().unwrap().take().expect("operation observed its context");
    assert_eq!(context.retry_count(), 2);
    assert!(context.flag(keys::EXHAUSTED));
    assert!(context.flag(keys::RECOVERED));
    assert!(context.flag(keys::CLOSED));
}

#[test]
fn non_retryable_fault_short_circuits() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = RetryEngine::builder()
        .max_attempts(3)
        .no_retry_for::<Fatal>()
        .backoff_policy(FixedBackOffPolicy::new(Duration::from_millis(10)).sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>))
        .build();

    let calls = AtomicU32::new(0);
    let result: Result<(), _> = engine.execute(|_context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Fatal)
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sleeper.durations().is_empty());
    match result.expect_err("fatal is terminal") {
        RetryError::Operation(error) => assert_eq!(error.to_string(), "fatal"),
        other => panic!("expected the raw operation error, got {other:?}"),
    }
}

#[test]
fn retry_for_limits_retries_to_listed_types() {
    let engine = RetryEngine::builder().max_attempts(5).retry_for::<Transient>().build();

    let transient_calls = AtomicU32::new(0);
    let _ = engine.execute(|_context| {
        transient_calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Transient("keep going"))
    });
    assert_eq!(transient_calls.load(Ordering::SeqCst), 5);

    // An unlisted type is terminal on the first failure.
    let engine = RetryEngine::builder().max_attempts(5).retry_for::<Transient>().build();
    let fatal_calls = AtomicU32::new(0);
    let result: Result<(), RetryError<Fatal>> = engine.execute(|_context| {
        fatal_calls.fetch_add(1, Ordering::SeqCst);
        Err(Fatal)
    });
    assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(RetryError::Operation(_))));
}

#[test]
fn traverse_causes_classifies_wrapped_errors() {
    let engine = RetryEngine::builder()
        .max_attempts(3)
        .retry_for::<Transient>()
        .traverse_causes(true)
        .build();

    let calls = AtomicU32::new(0);
    let _ = engine.execute(|_context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(Wrapped(Box::new(Transient("inside"))))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn single_attempt_has_no_backoff() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = RetryEngine::builder()
        .max_attempts(1)
        .backoff_policy(FixedBackOffPolicy::default().sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>))
        .build();

    let calls = AtomicU32::new(0);
    let result: Result<(), _> = engine.execute(|_context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Transient("once"))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sleeper.durations().is_empty());
    assert!(matches!(result, Err(RetryError::Operation(_))));
}

#[test]
fn zero_attempts_is_exhausted_on_entry() {
    let engine = RetryEngine::builder().max_attempts(0).build();

    let calls = AtomicU32::new(0);
    let result: Result<(), _> = engine.execute(|_context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(Transient("never runs"))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    match result.expect_err("no attempts were allowed") {
        RetryError::Exhausted { last } => assert!(last.is_none()),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn zero_attempts_still_recovers() {
    let engine = RetryEngine::builder().max_attempts(0).build();

    let result: Result<&str, RetryError<Transient>> =
        engine.execute_with_recovery(|_context| Err(Transient("never runs")), |_context| Ok("fallback"));

    assert_eq!(result.expect("recovery runs even with zero attempts"), "fallback");
}

#[test]
fn listeners_open_in_order_and_unwind_in_reverse() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let engine = RetryEngine::builder()
        .max_attempts(2)
        .listener(RecordingListener::new("a", Arc::clone(&events)))
        .listener(RecordingListener::new("b", Arc::clone(&events)))
        .build();

    let calls = AtomicU32::new(0);
    let result = engine.execute(|_context| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Transient("first fails"))
        } else {
            Ok(())
        }
    });

    assert!(result.is_ok());
    assert_eq!(
        *events.lock().unwrap(),
        [
            "open:a", "open:b", "error:b", "error:a", "success:b", "success:a", "close_ok:b",
            "close_ok:a",
        ]
    );
}

#[test]
fn open_veto_terminates_before_any_attempt() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let engine = RetryEngine::builder()
        .listener(RecordingListener::vetoing("veto", Arc::clone(&events)))
        .build();

    let calls = AtomicU32::new(0);
    let result: Result<(), RetryError<Transient>> = engine.execute(|_context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(result, Err(RetryError::Terminated)));
    // Close still fires exactly once.
    assert_eq!(*events.lock().unwrap(), ["open:veto", "close_ok:veto"]);
}

#[test]
fn operation_can_force_exhaustion() {
    let engine = RetryEngine::builder().max_attempts(10).build();

    let calls = AtomicU32::new(0);
    let result: Result<(), _> = engine.execute(|context| {
        calls.fetch_add(1, Ordering::SeqCst);
        context.set_exhausted_only();
        Err(Transient("give up now"))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(RetryError::Operation(_))));
}

#[test]
fn recovery_errors_propagate_raw() {
    let engine = RetryEngine::builder().max_attempts(1).build();

    let result: Result<(), _> = engine.execute_with_recovery(
        |_context| Err(Transient("operation")),
        |_context| Err(Transient("recovery failed too")),
    );

    match result.expect_err("recovery failed") {
        RetryError::Operation(error) => assert_eq!(error.to_string(), "transient: recovery failed too"),
        other => panic!("expected the recovery error, got {other:?}"),
    }
}

#[test]
fn not_recoverable_faults_skip_recovery() {
    let engine = RetryEngine::builder()
        .max_attempts(2)
        .not_recoverable::<Fatal>()
        .no_retry_for::<Fatal>()
        .build();

    let recovery_calls = AtomicU32::new(0);
    let result: Result<(), _> = engine.execute_with_recovery(
        |_context| Err(Fatal),
        |_context| {
            recovery_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    assert_eq!(recovery_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(result, Err(RetryError::Operation(_))));
}

#[test]
fn max_attempts_attribute_is_published() {
    let engine = RetryEngine::builder().max_attempts(4).build();

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    let result: Result<(), RetryError<Transient>> = engine.execute(move |context| {
        *seen_clone.lock().unwrap() = context.attribute::<u32>(keys::MAX_ATTEMPTS).map(|max| *max);
        Ok(())
    });

    assert!(result.is_ok());
    assert_eq!(seen.lock().unwrap().take(), Some(4));
}

#[test]
fn nested_executions_link_and_restore_contexts() {
    let outer_engine = RetryEngine::builder().build();
    let inner_engine = RetryEngine::builder().build();

    let result: Result<(), RetryError<Transient>> = outer_engine.execute(|_outer| {
        let outer_context = current_context().expect("outer registered");

        let inner: Result<(), RetryError<Transient>> = inner_engine.execute(|inner_context| {
            assert!(
                inner_context
                    .parent()
                    .is_some_and(|parent| Arc::ptr_eq(parent, &outer_context))
            );
            Ok(())
        });
        assert!(inner.is_ok());

        // The inner execution restored the outer context on exit.
        assert!(current_context().is_some_and(|current| Arc::ptr_eq(&current, &outer_context)));
        Ok(())
    });

    assert!(result.is_ok());
    assert!(current_context().is_none());
}

#[test]
fn thread_map_registry_mode_works_end_to_end() {
    let engine = RetryEngine::builder().use_thread_local(false).build();

    let result: Result<(), RetryError<Transient>> = engine.execute(|_context| {
        assert!(current_context().is_some());
        Ok(())
    });

    assert!(result.is_ok());
    assert!(current_context().is_none());
}
