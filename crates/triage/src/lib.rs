// Copyright (c) Microsoft Corporation.

//! Fault capture and binary error classification for resilience patterns.
//!
//! This crate provides the types that retry and recovery middleware use to
//! reason about failures without knowing their concrete types:
//!
//! - [`Fault`]: a cheaply cloneable, type-erased capture of an operation
//!   error. The concrete [`TypeId`][std::any::TypeId] is recorded at the
//!   point where the error type is still statically known, so classification
//!   and memoization stay possible after erasure.
//! - [`BinaryErrorClassifier`]: a yes/no decision over faults, driven by
//!   per-type rules, an optional walk of the cause chain, and a default for
//!   everything unmatched.
//!
//! # Examples
//!
//! ```rust
//! use triage::{BinaryErrorClassifier, Fault};
//!
//! #[derive(Debug)]
//! struct Transient;
//!
//! impl std::fmt::Display for Transient {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "transient failure")
//!     }
//! }
//!
//! impl std::error::Error for Transient {}
//!
//! let classifier = BinaryErrorClassifier::new(false).with_rule::<Transient>(true);
//!
//! assert!(classifier.classify(&Fault::new(Transient)));
//! assert!(!classifier.classify(&Fault::new(std::io::Error::other("permanent"))));
//! ```

mod classifier;
mod fault;

pub use classifier::BinaryErrorClassifier;
pub use fault::Fault;
