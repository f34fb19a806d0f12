// Copyright (c) Microsoft Corporation.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use dashmap::DashMap;

use crate::context::RetryContext;
use crate::error::CacheCapacityExceeded;
use crate::state::RetryKey;

/// Default capacity of [`InMemoryRetryContextCache`].
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Stores retry contexts by key so stateful executions can resume a failed
/// operation's context in a later invocation.
///
/// Implementations must be safe for concurrent readers and writers; the cache
/// is the only synchronization surface between executions that share a key.
/// The engine tolerates the benign race where [`contains`][Self::contains]
/// observes a key that a concurrent removal erases before
/// [`get`][Self::get] runs; it opens a fresh context in that case.
pub trait RetryContextCache: Send + Sync {
    /// Returns the context cached for `key`, if any.
    fn get(&self, key: &RetryKey) -> Option<Arc<RetryContext>>;

    /// Caches `context` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheCapacityExceeded`] when a bounded cache refuses to grow.
    fn put(&self, key: RetryKey, context: Arc<RetryContext>) -> Result<(), CacheCapacityExceeded>;

    /// Removes the entry for `key`, if present.
    fn remove(&self, key: &RetryKey);

    /// Returns true when an entry exists for `key`.
    fn contains(&self, key: &RetryKey) -> bool;
}

/// The default in-memory, bounded [`RetryContextCache`].
///
/// Capacity enforcement is best-effort under concurrency: a `put` that would
/// grow the cache past its capacity fails, but concurrent `put`s may
/// transiently overshoot by a few entries.
pub struct InMemoryRetryContextCache {
    map: DashMap<RetryKey, Arc<RetryContext>>,
    capacity: usize,
}

impl InMemoryRetryContextCache {
    /// Creates a cache with [`DEFAULT_CACHE_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache bounded at `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            capacity,
        }
    }

    /// Returns the number of cached contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for InMemoryRetryContextCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryContextCache for InMemoryRetryContextCache {
    fn get(&self, key: &RetryKey) -> Option<Arc<RetryContext>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn put(&self, key: RetryKey, context: Arc<RetryContext>) -> Result<(), CacheCapacityExceeded> {
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            return Err(CacheCapacityExceeded {
                capacity: self.capacity,
            });
        }

        self.map.insert(key, context);
        Ok(())
    }

    fn remove(&self, key: &RetryKey) {
        self.map.remove(key);
    }

    fn contains(&self, key: &RetryKey) -> bool {
        self.map.contains_key(key)
    }
}

impl Debug for InMemoryRetryContextCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRetryContextCache")
            .field("len", &self.map.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    fn context() -> Arc<RetryContext> {
        Arc::new(RetryContext::new(None))
    }

    #[test]
    fn assert_types() {
        assert_impl_all!(InMemoryRetryContextCache: RetryContextCache, Send, Sync);
    }

    #[test]
    fn put_get_roundtrip() {
        let cache = InMemoryRetryContextCache::new();
        let key = RetryKey::new("k");
        let stored = context();

        cache.put(key.clone(), Arc::clone(&stored)).expect("within capacity");

        assert!(cache.contains(&key));
        assert!(cache.get(&key).is_some_and(|c| Arc::ptr_eq(&c, &stored)));
    }

    #[test]
    fn get_of_missing_key_is_none() {
        let cache = InMemoryRetryContextCache::new();
        assert!(cache.get(&RetryKey::new("missing")).is_none());
        assert!(!cache.contains(&RetryKey::new("missing")));
    }

    #[test]
    fn remove_erases_the_entry() {
        let cache = InMemoryRetryContextCache::new();
        let key = RetryKey::new("k");

        cache.put(key.clone(), context()).expect("within capacity");
        cache.remove(&key);

        assert!(!cache.contains(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn put_over_capacity_fails() {
        let cache = InMemoryRetryContextCache::with_capacity(2);

        cache.put(RetryKey::new(1_u8), context()).expect("within capacity");
        cache.put(RetryKey::new(2_u8), context()).expect("within capacity");

        let error = cache.put(RetryKey::new(3_u8), context()).expect_err("over capacity");
        assert_eq!(error.capacity, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replacing_an_existing_key_is_allowed_at_capacity() {
        let cache = InMemoryRetryContextCache::with_capacity(1);
        let key = RetryKey::new("k");
        let replacement = context();

        cache.put(key.clone(), context()).expect("within capacity");
        cache.put(key.clone(), Arc::clone(&replacement)).expect("replacement");

        assert!(cache.get(&key).is_some_and(|c| Arc::ptr_eq(&c, &replacement)));
    }
}
