// Copyright (c) Microsoft Corporation.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// A parameter that is either a fixed value or re-evaluated on every use.
///
/// Policies read tuning parameters (delays, multipliers, attempt limits)
/// through suppliers so the values can change between attempts without
/// rebuilding the policy and without affecting state that was already
/// snapshotted for an in-flight execution.
///
/// # Examples
///
/// ```rust
/// use mulligan::Supplier;
///
/// let fixed = Supplier::from(3_u32);
/// assert_eq!(fixed.get(), 3);
///
/// let dynamic = Supplier::from_fn(|| 2 + 2);
/// assert_eq!(dynamic.get(), 4);
/// ```
pub struct Supplier<T>(Inner<T>);

enum Inner<T> {
    Value(T),
    Fn(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Supplier<T> {
    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> T {
        match &self.0 {
            Inner::Value(value) => value.clone(),
            Inner::Fn(supplier) => supplier(),
        }
    }
}

impl<T> Supplier<T> {
    /// Creates a supplier that evaluates `f` on every [`get`][Self::get].
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self(Inner::Fn(Arc::new(f)))
    }
}

impl<T> From<T> for Supplier<T> {
    fn from(value: T) -> Self {
        Self(Inner::Value(value))
    }
}

impl<T: Clone> Clone for Supplier<T> {
    fn clone(&self) -> Self {
        match &self.0 {
            Inner::Value(value) => Self(Inner::Value(value.clone())),
            Inner::Fn(supplier) => Self(Inner::Fn(Arc::clone(supplier))),
        }
    }
}

impl<T: Debug> Debug for Supplier<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Value(value) => f.debug_tuple("Supplier").field(value).finish(),
            Inner::Fn(_) => f.debug_tuple("Supplier").field(&"<fn>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn value_supplier_is_constant() {
        let supplier = Supplier::from(7_u32);
        assert_eq!(supplier.get(), 7);
        assert_eq!(supplier.get(), 7);
    }

    #[test]
    fn fn_supplier_re_evaluates() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let supplier = Supplier::from_fn(move || counter_clone.fetch_add(1, Ordering::SeqCst));

        assert_eq!(supplier.get(), 0);
        assert_eq!(supplier.get(), 1);
    }

    #[test]
    fn clone_shares_the_function() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let supplier = Supplier::from_fn(move || counter_clone.fetch_add(1, Ordering::SeqCst));
        let cloned = supplier.clone();

        assert_eq!(supplier.get(), 0);
        assert_eq!(cloned.get(), 1);
    }

    #[test]
    fn debug_hides_functions() {
        assert_eq!(format!("{:?}", Supplier::from(1_u8)), "Supplier(1)");
        assert_eq!(format!("{:?}", Supplier::<u8>::from_fn(|| 1)), "Supplier(\"<fn>\")");
    }
}
