//! Predicate precision: the set of predicates abstraction is computed over.

use std::fmt;

use indexmap::IndexSet;
use skein_smt::terms::SmtTerm;

/// Where a predicate is meant to be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PredicateRole {
    Global,
    /// Learned at a cut point of an infeasible trace.
    Intermediate,
    Local,
}

/// Join-semilattice of predicate sets, ordered by inclusion.
///
/// Insertion order is kept so that abstraction over the precision is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicatePrecision {
    predicates: IndexSet<(SmtTerm, PredicateRole)>,
}

impl PredicatePrecision {
    pub fn bottom() -> Self {
        Self::default()
    }

    pub fn of(predicate: SmtTerm, role: PredicateRole) -> Self {
        let mut predicates = IndexSet::new();
        predicates.insert((predicate, role));
        PredicatePrecision { predicates }
    }

    pub fn from_predicates(
        predicates: impl IntoIterator<Item = SmtTerm>,
        role: PredicateRole,
    ) -> Self {
        PredicatePrecision {
            predicates: predicates.into_iter().map(|p| (p, role)).collect(),
        }
    }

    pub fn join(&self, other: &PredicatePrecision) -> PredicatePrecision {
        let mut predicates = self.predicates.clone();
        predicates.extend(other.predicates.iter().cloned());
        PredicatePrecision { predicates }
    }

    pub fn is_leq(&self, other: &PredicatePrecision) -> bool {
        self.predicates.is_subset(&other.predicates)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn contains(&self, predicate: &SmtTerm, role: PredicateRole) -> bool {
        self.predicates.contains(&(predicate.clone(), role))
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&SmtTerm, PredicateRole)> {
        self.predicates.iter().map(|(p, r)| (p, *r))
    }
}

impl fmt::Display for PredicatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (p, role)) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p} [{role:?}]")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pred(n: i64) -> SmtTerm {
        SmtTerm::var("x@0").le(SmtTerm::int(n))
    }

    #[test]
    fn bottom_is_below_everything() {
        let p = PredicatePrecision::of(pred(1), PredicateRole::Intermediate);
        assert!(PredicatePrecision::bottom().is_leq(&p));
        assert!(!p.is_leq(&PredicatePrecision::bottom()));
    }

    #[test]
    fn roles_distinguish_predicates() {
        let global = PredicatePrecision::of(pred(1), PredicateRole::Global);
        let local = PredicatePrecision::of(pred(1), PredicateRole::Local);
        assert_eq!(global.join(&local).len(), 2);
        assert!(!global.is_leq(&local));
    }

    proptest! {
        #[test]
        fn join_is_an_upper_bound(a in proptest::collection::vec(-5i64..5, 0..6),
                                  b in proptest::collection::vec(-5i64..5, 0..6)) {
            let role = PredicateRole::Intermediate;
            let pa = PredicatePrecision::from_predicates(a.into_iter().map(pred), role);
            let pb = PredicatePrecision::from_predicates(b.into_iter().map(pred), role);
            let joined = pa.join(&pb);
            prop_assert!(pa.is_leq(&joined));
            prop_assert!(pb.is_leq(&joined));
            prop_assert_eq!(joined.join(&pa), joined.clone());
        }
    }
}
