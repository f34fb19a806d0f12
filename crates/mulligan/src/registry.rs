// Copyright (c) Microsoft Corporation.

use std::cell::RefCell;
use std::sync::{Arc, LazyLock};
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use crate::context::RetryContext;

thread_local! {
    static CURRENT: RefCell<Option<Arc<RetryContext>>> = const { RefCell::new(None) };
}

static BY_THREAD: LazyLock<DashMap<ThreadId, Arc<RetryContext>>> = LazyLock::new(DashMap::new);

/// Returns the context of the retry execution currently running on this
/// thread, if any.
///
/// The engine registers the active context on entry and restores the previous
/// one on exit, so code invoked from inside an operation, listener, or
/// recovery function can observe the active context without having it passed
/// through.
///
/// # Examples
///
/// ```rust
/// use mulligan::{current_context, RetryEngine};
///
/// let engine = RetryEngine::builder().build();
/// let result: Result<u32, _> = engine.execute(|_context| {
///     assert!(mulligan::current_context().is_some());
///     Ok::<_, std::io::Error>(1)
/// });
/// assert_eq!(result.unwrap(), 1);
/// assert!(current_context().is_none());
/// ```
#[must_use]
pub fn current_context() -> Option<Arc<RetryContext>> {
    CURRENT
        .with(|current| current.borrow().clone())
        .or_else(|| BY_THREAD.get(&thread::current().id()).map(|entry| Arc::clone(entry.value())))
}

/// Publishes `context` as the current context for this thread and returns the
/// previously registered one.
///
/// `use_thread_local` selects a true thread-local slot; otherwise a
/// process-wide thread-keyed map is used, which avoids per-thread storage in
/// environments with very many short-lived threads.
pub(crate) fn register(
    context: Arc<RetryContext>,
    use_thread_local: bool,
) -> Option<Arc<RetryContext>> {
    if use_thread_local {
        CURRENT.with(|current| current.borrow_mut().replace(context))
    } else {
        BY_THREAD.insert(thread::current().id(), context)
    }
}

/// Restores the previously registered context (or clears the slot).
pub(crate) fn restore(previous: Option<Arc<RetryContext>>, use_thread_local: bool) {
    if use_thread_local {
        CURRENT.with(|current| *current.borrow_mut() = previous);
    } else {
        match previous {
            Some(context) => {
                BY_THREAD.insert(thread::current().id(), context);
            }
            None => {
                BY_THREAD.remove(&thread::current().id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_register_and_restore() {
        let outer = Arc::new(RetryContext::new(None));
        let inner = Arc::new(RetryContext::new(None));

        assert!(register(Arc::clone(&outer), true).is_none());
        let previous = register(Arc::clone(&inner), true);
        assert!(previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, &outer)));
        assert!(current_context().is_some_and(|c| Arc::ptr_eq(&c, &inner)));

        restore(previous, true);
        assert!(current_context().is_some_and(|c| Arc::ptr_eq(&c, &outer)));

        restore(None, true);
        assert!(current_context().is_none());
    }

    #[test]
    fn thread_map_register_and_restore() {
        let context = Arc::new(RetryContext::new(None));

        assert!(register(Arc::clone(&context), false).is_none());
        assert!(current_context().is_some_and(|c| Arc::ptr_eq(&c, &context)));

        restore(None, false);
        assert!(current_context().is_none());
    }

    #[test]
    fn thread_map_is_per_thread() {
        let context = Arc::new(RetryContext::new(None));
        register(Arc::clone(&context), false);

        let seen_elsewhere = std::thread::spawn(|| current_context().is_some())
            .join()
            .expect("thread exits cleanly");
        assert!(!seen_elsewhere);

        restore(None, false);
    }
}
