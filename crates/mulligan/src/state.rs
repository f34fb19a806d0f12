// Copyright (c) Microsoft Corporation.

use std::any::Any;
use std::borrow::Cow;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use triage::{BinaryErrorClassifier, Fault};

/// A type-erased identifier for a logical operation retried across separate
/// top-level invocations.
///
/// Any value with stable equality and hashing can serve as a key. Two keys
/// are equal only when they were built from the same concrete type and the
/// underlying values compare equal.
///
/// # Examples
///
/// ```rust
/// use mulligan::RetryKey;
///
/// let a = RetryKey::new(("orders", 42_u64));
/// let b = RetryKey::new(("orders", 42_u64));
/// let c = RetryKey::new("orders-42");
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
#[derive(Clone)]
pub struct RetryKey(Arc<dyn DynKey>);

impl RetryKey {
    /// Wraps `key` as a retry key.
    pub fn new<K>(key: K) -> Self
    where
        K: Hash + Eq + Debug + Send + Sync + 'static,
    {
        Self(Arc::new(KeyValue(key)))
    }

    /// Builds a key qualified by a call-site label, so equal caller keys used
    /// from different call sites do not collide in a shared cache.
    pub fn qualified(label: impl Into<Cow<'static, str>>, key: Self) -> Self {
        Self::new((label.into(), key))
    }
}

impl PartialEq for RetryKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_ref())
    }
}

impl Eq for RetryKey {}

impl Hash for RetryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_dyn(state);
    }
}

impl Debug for RetryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetryKey").field(&self.0.as_debug()).finish()
    }
}

trait DynKey: Send + Sync {
    fn eq_dyn(&self, other: &dyn DynKey) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
    fn as_debug(&self) -> &dyn Debug;
}

struct KeyValue<K>(K);

impl<K> DynKey for KeyValue<K>
where
    K: Hash + Eq + Debug + Send + Sync + 'static,
{
    fn eq_dyn(&self, other: &dyn DynKey) -> bool {
        other.as_any().downcast_ref::<K>().is_some_and(|key| *key == self.0)
    }

    fn hash_dyn(&self, mut state: &mut dyn Hasher) {
        std::any::TypeId::of::<K>().hash(&mut state);
        self.0.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }

    fn as_debug(&self) -> &dyn Debug {
        &self.0
    }
}

/// Caller-supplied descriptor that makes an execution stateful.
///
/// Supplying a `RetryState` to the engine keys the retry context by
/// [`RetryKey`], caches it across invocations, and enables the rollback
/// protocol: when [`rollback_for`][Self::rollback_for] classifies a fault as
/// requiring rollback and attempts remain, the engine rethrows it so the
/// caller's surrounding transaction can roll back, and the next invocation
/// with the same key resumes from the cached context.
///
/// By default every fault rolls back. Install a
/// [`BinaryErrorClassifier`] to downgrade selected errors to in-stack retry.
#[derive(Debug)]
pub struct RetryState {
    key: RetryKey,
    force_refresh: bool,
    rollback_classifier: Option<BinaryErrorClassifier>,
}

impl RetryState {
    /// Creates a state descriptor for `key`.
    #[must_use]
    pub fn new(key: RetryKey) -> Self {
        Self {
            key,
            force_refresh: false,
            rollback_classifier: None,
        }
    }

    /// When enabled, the cache lookup is skipped and a fresh context is
    /// opened even when one is cached for the key.
    #[must_use]
    pub fn force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Installs the classifier deciding which faults roll back (classified
    /// `true`) versus retry in-stack (classified `false`).
    #[must_use]
    pub fn rollback_classifier(mut self, classifier: BinaryErrorClassifier) -> Self {
        self.rollback_classifier = Some(classifier);
        self
    }

    /// Returns the cache key.
    #[must_use]
    pub fn key(&self) -> &RetryKey {
        &self.key
    }

    /// Returns true when the cache lookup should be skipped.
    #[must_use]
    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }

    /// Returns true when `fault` should roll back the caller's transaction.
    #[must_use]
    pub fn rollback_for(&self, fault: &Fault) -> bool {
        self.rollback_classifier
            .as_ref()
            .is_none_or(|classifier| classifier.classify(fault))
    }
}
