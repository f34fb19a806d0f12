// Copyright (c) Microsoft Corporation.

use std::any::TypeId;
use std::error::Error;

use dashmap::DashMap;

use crate::Fault;

/// A yes/no decision over faults, driven by per-type rules.
///
/// The classifier answers a single binary question about a fault: retryable or
/// not, rollback or not, recoverable or not. Which question is being asked is
/// up to the caller; the classifier only knows types and values.
///
/// Classification proceeds in this order:
///
/// 1. If a rule is registered for the fault's concrete type, its value wins.
/// 2. Otherwise, when cause traversal is enabled, the error's
///    [`source()`][Error::source] chain is walked outward-in and the first
///    cause with a registered rule wins.
/// 3. Otherwise the default value is returned.
///
/// Decisions derived from the concrete type are memoized per [`TypeId`] in a
/// concurrent map, so repeated classification of the same error type is a
/// single map lookup. Decisions derived from a cause chain depend on the
/// specific error instance and are recomputed each time.
///
/// # Examples
///
/// ```rust
/// use triage::{BinaryErrorClassifier, Fault};
///
/// let retryable = BinaryErrorClassifier::new(false)
///     .with_rule::<std::io::Error>(true);
///
/// assert!(retryable.classify(&Fault::new(std::io::Error::other("reset"))));
/// assert!(!retryable.classify(&Fault::new(std::fmt::Error)));
/// ```
#[derive(Clone, Debug)]
pub struct BinaryErrorClassifier {
    rules: Vec<Rule>,
    default_value: bool,
    traverse_causes: bool,
    memo: DashMap<TypeId, bool>,
}

#[derive(Clone, Debug)]
struct Rule {
    type_id: TypeId,
    probe: fn(&(dyn Error + 'static)) -> bool,
    value: bool,
}

fn probe_for<E: Error + 'static>(error: &(dyn Error + 'static)) -> bool {
    error.is::<E>()
}

impl BinaryErrorClassifier {
    /// Creates a classifier with no rules that answers `default_value` for
    /// every fault.
    #[must_use]
    pub fn new(default_value: bool) -> Self {
        Self {
            rules: Vec::new(),
            default_value,
            traverse_causes: false,
            memo: DashMap::new(),
        }
    }

    /// Registers `value` as the answer for faults of concrete type `E`.
    ///
    /// Re-registering a type replaces the earlier rule.
    #[must_use]
    pub fn with_rule<E: Error + 'static>(mut self, value: bool) -> Self {
        let type_id = TypeId::of::<E>();
        self.rules.retain(|rule| rule.type_id != type_id);
        self.rules.push(Rule {
            type_id,
            probe: probe_for::<E>,
            value,
        });
        self
    }

    /// Replaces the answer for faults matched by no rule.
    #[must_use]
    pub fn default_value(mut self, value: bool) -> Self {
        self.default_value = value;
        self
    }

    /// Enables or disables walking the cause chain when the outermost error
    /// has no registered rule.
    #[must_use]
    pub fn traverse_causes(mut self, enabled: bool) -> Self {
        self.traverse_causes = enabled;
        self
    }

    /// Classifies a fault.
    #[must_use]
    pub fn classify(&self, fault: &Fault) -> bool {
        let type_id = fault.type_id();
        if let Some(hit) = self.memo.get(&type_id) {
            return *hit;
        }

        if let Some(rule) = self.rules.iter().find(|rule| rule.type_id == type_id) {
            self.memo.insert(type_id, rule.value);
            return rule.value;
        }

        if self.traverse_causes {
            let mut cause = fault.as_error().source();
            while let Some(error) = cause {
                if let Some(rule) = self.rules.iter().find(|rule| (rule.probe)(error)) {
                    // Instance-specific: the same outer type may wrap a
                    // different cause next time, so this is not memoized.
                    return rule.value;
                }
                cause = error.source();
            }
            return self.default_value;
        }

        self.memo.insert(type_id, self.default_value);
        self.default_value
    }

    /// Returns the answer given to faults matched by no rule.
    #[must_use]
    pub fn default_for_unmatched(&self) -> bool {
        self.default_value
    }

    /// Returns true when the classifier has no per-type rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::{self, Display, Formatter};

    use static_assertions::assert_impl_all;

    use super::*;

    #[derive(Debug)]
    struct Transient;

    #[derive(Debug)]
    struct Permanent;

    #[derive(Debug)]
    struct Outer(Box<dyn Error + Send + Sync>);

    macro_rules! display_as_debug {
        ($ty:ty) => {
            impl Display for $ty {
                fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                    write!(f, "{self:?}")
                }
            }
        };
    }

    display_as_debug!(Transient);
    display_as_debug!(Permanent);
    display_as_debug!(Outer);

    impl Error for Transient {}
    impl Error for Permanent {}

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[test]
    fn assert_types() {
        assert_impl_all!(BinaryErrorClassifier: Send, Sync, Clone);
    }

    #[test]
    fn direct_rule_beats_default() {
        let classifier = BinaryErrorClassifier::new(false).with_rule::<Transient>(true);

        assert!(classifier.classify(&Fault::new(Transient)));
        assert!(!classifier.classify(&Fault::new(Permanent)));
    }

    #[test]
    fn re_registering_replaces_the_rule() {
        let classifier = BinaryErrorClassifier::new(false)
            .with_rule::<Transient>(true)
            .with_rule::<Transient>(false);

        assert!(!classifier.classify(&Fault::new(Transient)));
    }

    #[test]
    fn unmatched_uses_default() {
        assert!(BinaryErrorClassifier::new(true).classify(&Fault::new(Permanent)));
        assert!(!BinaryErrorClassifier::new(false).classify(&Fault::new(Permanent)));
    }

    #[test]
    fn causes_ignored_unless_traversal_enabled() {
        let classifier = BinaryErrorClassifier::new(false).with_rule::<Transient>(true);

        let wrapped = Fault::new(Outer(Box::new(Transient)));
        assert!(!classifier.classify(&wrapped));

        let classifier = classifier.traverse_causes(true);
        assert!(classifier.classify(&wrapped));
    }

    #[test]
    fn traversal_stops_at_first_classified_cause() {
        let classifier = BinaryErrorClassifier::new(true)
            .with_rule::<Transient>(false)
            .with_rule::<Permanent>(true)
            .traverse_causes(true);

        // Outer -> Transient(false) wins over deeper causes and the default.
        let chain = Fault::new(Outer(Box::new(Transient)));
        assert!(!classifier.classify(&chain));
    }

    #[test]
    fn outer_rule_wins_over_causes() {
        let classifier = BinaryErrorClassifier::new(false)
            .with_rule::<Outer>(false)
            .with_rule::<Transient>(true)
            .traverse_causes(true);

        let chain = Fault::new(Outer(Box::new(Transient)));
        assert!(!classifier.classify(&chain));
    }

    #[test]
    fn type_decisions_are_memoized() {
        let classifier = BinaryErrorClassifier::new(false).with_rule::<Transient>(true);

        assert!(classifier.classify(&Fault::new(Transient)));
        assert_eq!(classifier.memo.len(), 1);

        // Second classification of the same type is served from the memo.
        assert!(classifier.classify(&Fault::new(Transient)));
        assert_eq!(classifier.memo.len(), 1);
    }

    #[test]
    fn cause_decisions_are_not_memoized() {
        let classifier = BinaryErrorClassifier::new(false)
            .with_rule::<Transient>(true)
            .traverse_causes(true);

        assert!(classifier.classify(&Fault::new(Outer(Box::new(Transient)))));
        assert!(!classifier.classify(&Fault::new(Outer(Box::new(Permanent)))));
    }
}
