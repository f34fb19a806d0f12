// Copyright (c) Microsoft Corporation.

use std::any::TypeId;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

/// A type-erased, cheaply cloneable capture of an operation error.
///
/// Retry middleware observes failures in places where the concrete error type
/// is no longer statically known: listener hooks, cached contexts that outlive
/// a single invocation, and object-safe policy traits. `Fault` erases the
/// error exactly once, at the boundary where its type is still known, and
/// keeps the concrete [`TypeId`] and type name alongside the erased value so
/// classifiers can keep making per-type decisions afterwards.
///
/// Cloning a `Fault` clones an [`Arc`], not the error.
///
/// # Examples
///
/// ```rust
/// use triage::Fault;
///
/// let fault = Fault::new(std::io::Error::other("connection reset"));
///
/// assert!(fault.is::<std::io::Error>());
/// assert_eq!(fault.to_string(), "connection reset");
/// assert!(fault.downcast_ref::<std::io::Error>().is_some());
/// ```
#[derive(Clone)]
pub struct Fault {
    inner: Arc<dyn Error + Send + Sync + 'static>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Fault {
    /// Captures an owned error.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(error))
    }

    /// Captures an error that is already shared.
    ///
    /// Use this when the caller needs to keep its own typed handle to the
    /// error alongside the erased capture.
    pub fn from_arc<E>(error: Arc<E>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: error,
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// Returns the [`TypeId`] of the concrete error this fault was captured from.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the name of the concrete error type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true when the fault was captured from an `E`.
    #[must_use]
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Borrows the captured error as `E`, if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.as_error().downcast_ref::<E>()
    }

    /// Borrows the captured error as a trait object.
    #[must_use]
    pub fn as_error(&self) -> &(dyn Error + 'static) {
        self.inner.as_ref()
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Debug for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("type", &self.type_name)
            .field("error", &self.inner)
            .finish()
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[derive(Debug)]
    struct Wrapper(std::io::Error);

    impl Display for Wrapper {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl Error for Wrapper {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn assert_types() {
        assert_impl_all!(Fault: Send, Sync, Clone);
    }

    #[test]
    fn captures_concrete_type() {
        let fault = Fault::new(std::io::Error::other("boom"));

        assert!(fault.is::<std::io::Error>());
        assert!(!fault.is::<Wrapper>());
        assert_eq!(fault.type_id(), TypeId::of::<std::io::Error>());
        assert!(fault.type_name().contains("io"));
    }

    #[test]
    fn downcast_roundtrip() {
        let fault = Fault::new(std::io::Error::other("boom"));

        let io = fault.downcast_ref::<std::io::Error>().expect("io error");
        assert_eq!(io.to_string(), "boom");
        assert!(fault.downcast_ref::<Wrapper>().is_none());
    }

    #[test]
    fn display_delegates_and_source_is_inner_source() {
        let fault = Fault::new(Wrapper(std::io::Error::other("root")));

        assert_eq!(fault.to_string(), "wrapped: root");
        assert_eq!(fault.source().expect("source").to_string(), "root");
    }

    #[test]
    fn from_arc_shares_the_error() {
        let shared = Arc::new(std::io::Error::other("boom"));
        let fault = Fault::from_arc(Arc::clone(&shared));

        assert_eq!(Arc::strong_count(&shared), 2);
        assert!(fault.is::<std::io::Error>());
        drop(fault);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
