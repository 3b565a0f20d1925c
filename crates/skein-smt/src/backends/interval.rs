//! Reference interpolating backend for conjunctions of bound literals.
//!
//! The supported fragment is conjunctions (arbitrarily nested) of
//! `v ⋈ c` and `c ⋈ v` with `⋈` one of `= < <= > >=`, their negations,
//! boolean variables, their negations and boolean literals. Within the
//! fragment every variable is constrained independently, so satisfiability
//! reduces to interval emptiness per variable and interpolants are the
//! prefix constraints on the variables shared with the suffix.
//!
//! Anything outside the fragment is rejected with
//! [`IntervalError::UnsupportedTerm`].

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

use crate::backends::smtlib_printer::to_smtlib;
use crate::solver::{FirstOrderSolver, SatResult};
use crate::terms::SmtTerm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("term outside the bound-literal fragment: {term}")]
    UnsupportedTerm { term: String },
    #[error("pop without a matching push")]
    ScopeUnderflow,
    #[error("reference count of {term} dropped below zero")]
    RefCountUnderflow { term: String },
    #[error("interpolants requested without a preceding unsat check")]
    NoUnsatProof,
    #[error("variable '{var}' is used both as Bool and as Int")]
    SortMismatch { var: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rel {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Rel {
    fn negate(self) -> Rel {
        match self {
            Rel::Eq => Rel::Ne,
            Rel::Ne => Rel::Eq,
            Rel::Lt => Rel::Ge,
            Rel::Le => Rel::Gt,
            Rel::Gt => Rel::Le,
            Rel::Ge => Rel::Lt,
        }
    }

    /// `c ⋈ v` as `v ⋈' c`.
    fn mirror(self) -> Rel {
        match self {
            Rel::Eq | Rel::Ne => self,
            Rel::Lt => Rel::Gt,
            Rel::Le => Rel::Ge,
            Rel::Gt => Rel::Lt,
            Rel::Ge => Rel::Le,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Literal {
    Bound { var: String, rel: Rel, value: i64 },
    Bool { var: String, value: bool },
    Const(bool),
}

fn unsupported(term: &SmtTerm) -> IntervalError {
    IntervalError::UnsupportedTerm {
        term: to_smtlib(term),
    }
}

fn flatten(term: &SmtTerm, positive: bool, out: &mut Vec<Literal>) -> Result<(), IntervalError> {
    let comparison = |rel: Rel, l: &SmtTerm, r: &SmtTerm| -> Result<Literal, IntervalError> {
        let (var, rel, value) = match (l, r) {
            (SmtTerm::Var(v), SmtTerm::IntLit(c)) => (v, rel, *c),
            (SmtTerm::IntLit(c), SmtTerm::Var(v)) => (v, rel.mirror(), *c),
            _ => return Err(unsupported(term)),
        };
        let rel = if positive { rel } else { rel.negate() };
        Ok(Literal::Bound {
            var: var.clone(),
            rel,
            value,
        })
    };

    match term {
        SmtTerm::BoolLit(b) => out.push(Literal::Const(*b == positive)),
        SmtTerm::Var(v) => out.push(Literal::Bool {
            var: v.clone(),
            value: positive,
        }),
        SmtTerm::Not(inner) => flatten(inner, !positive, out)?,
        SmtTerm::And(terms) if positive => {
            for t in terms {
                flatten(t, true, out)?;
            }
        }
        SmtTerm::And(terms) if terms.is_empty() => out.push(Literal::Const(false)),
        SmtTerm::And(terms) if terms.len() == 1 => flatten(&terms[0], false, out)?,
        SmtTerm::Or(terms) if !positive => {
            for t in terms {
                flatten(t, false, out)?;
            }
        }
        SmtTerm::Or(terms) if terms.is_empty() => out.push(Literal::Const(false)),
        SmtTerm::Or(terms) if terms.len() == 1 => flatten(&terms[0], true, out)?,
        SmtTerm::Eq(l, r) => out.push(comparison(Rel::Eq, l, r)?),
        SmtTerm::Lt(l, r) => out.push(comparison(Rel::Lt, l, r)?),
        SmtTerm::Le(l, r) => out.push(comparison(Rel::Le, l, r)?),
        SmtTerm::Gt(l, r) => out.push(comparison(Rel::Gt, l, r)?),
        SmtTerm::Ge(l, r) => out.push(comparison(Rel::Ge, l, r)?),
        _ => return Err(unsupported(term)),
    }
    Ok(())
}

/// Integer interval with finitely many excluded points.
#[derive(Debug, Clone, Default)]
struct VarBounds {
    lo: Option<i128>,
    hi: Option<i128>,
    excluded: BTreeSet<i128>,
}

impl VarBounds {
    fn restrict(&mut self, rel: Rel, value: i64) {
        let value = i128::from(value);
        match rel {
            Rel::Eq => {
                self.raise(value);
                self.lower(value);
            }
            Rel::Ne => {
                self.excluded.insert(value);
            }
            Rel::Lt => self.lower(value - 1),
            Rel::Le => self.lower(value),
            Rel::Gt => self.raise(value + 1),
            Rel::Ge => self.raise(value),
        }
    }

    fn raise(&mut self, lo: i128) {
        self.lo = Some(self.lo.map_or(lo, |cur| cur.max(lo)));
    }

    fn lower(&mut self, hi: i128) {
        self.hi = Some(self.hi.map_or(hi, |cur| cur.min(hi)));
    }

    /// Bounds with excluded endpoints skipped, or `None` if empty.
    fn normalized(&self) -> Option<(Option<i128>, Option<i128>)> {
        let mut lo = self.lo;
        let mut hi = self.hi;
        while let Some(l) = lo {
            if !self.excluded.contains(&l) {
                break;
            }
            lo = Some(l + 1);
        }
        while let Some(h) = hi {
            if !self.excluded.contains(&h) {
                break;
            }
            hi = Some(h - 1);
        }
        match (lo, hi) {
            (Some(l), Some(h)) if l > h => None,
            bounds => Some(bounds),
        }
    }
}

fn lower_bound_literal(var: &str, lo: i128) -> SmtTerm {
    match i64::try_from(lo) {
        Ok(v) => SmtTerm::var(var).ge(SmtTerm::int(v)),
        Err(_) => SmtTerm::var(var).gt(SmtTerm::int(i64::MAX)),
    }
}

fn upper_bound_literal(var: &str, hi: i128) -> SmtTerm {
    match i64::try_from(hi) {
        Ok(v) => SmtTerm::var(var).le(SmtTerm::int(v)),
        Err(_) => SmtTerm::var(var).lt(SmtTerm::int(i64::MIN)),
    }
}

/// Accumulated constraints of a set of literals.
#[derive(Debug, Clone, Default)]
struct Constraints {
    ints: BTreeMap<String, VarBounds>,
    bools: BTreeMap<String, bool>,
    conflict: bool,
}

impl Constraints {
    fn add(&mut self, literal: &Literal) -> Result<(), IntervalError> {
        match literal {
            Literal::Const(true) => {}
            Literal::Const(false) => self.conflict = true,
            Literal::Bound { var, rel, value } => {
                if self.bools.contains_key(var) {
                    return Err(IntervalError::SortMismatch { var: var.clone() });
                }
                self.ints.entry(var.clone()).or_default().restrict(*rel, *value);
            }
            Literal::Bool { var, value } => {
                if self.ints.contains_key(var) {
                    return Err(IntervalError::SortMismatch { var: var.clone() });
                }
                match self.bools.get(var) {
                    Some(existing) if existing != value => self.conflict = true,
                    _ => {
                        self.bools.insert(var.clone(), *value);
                    }
                }
            }
        }
        Ok(())
    }

    fn is_sat(&self) -> bool {
        !self.conflict && self.ints.values().all(|b| b.normalized().is_some())
    }

    fn variables(&self) -> BTreeSet<String> {
        self.ints.keys().chain(self.bools.keys()).cloned().collect()
    }

    /// Conjunction of the constraints on `shared`; assumes `is_sat`.
    fn project(&self, shared: &BTreeSet<String>) -> SmtTerm {
        let mut conjuncts = Vec::new();
        for (var, bounds) in &self.ints {
            if !shared.contains(var) {
                continue;
            }
            let Some((lo, hi)) = bounds.normalized() else {
                return SmtTerm::bool(false);
            };
            if let (Some(l), Some(h)) = (lo, hi) {
                if l == h {
                    if let Ok(v) = i64::try_from(l) {
                        conjuncts.push(SmtTerm::var(var.as_str()).eq(SmtTerm::int(v)));
                        continue;
                    }
                }
            }
            if let Some(l) = lo {
                conjuncts.push(lower_bound_literal(var, l));
            }
            if let Some(h) = hi {
                conjuncts.push(upper_bound_literal(var, h));
            }
            for point in &bounds.excluded {
                let inside = lo.map_or(true, |l| *point > l) && hi.map_or(true, |h| *point < h);
                if !inside {
                    continue;
                }
                if let Ok(v) = i64::try_from(*point) {
                    conjuncts.push(SmtTerm::var(var.as_str()).eq(SmtTerm::int(v)).not());
                }
            }
        }
        for (var, value) in &self.bools {
            if !shared.contains(var) {
                continue;
            }
            let atom = SmtTerm::var(var.as_str());
            conjuncts.push(if *value { atom } else { atom.not() });
        }
        match conjuncts.len() {
            0 => SmtTerm::bool(true),
            1 => conjuncts.remove(0),
            _ => SmtTerm::and(conjuncts),
        }
    }
}

fn constraints_of<'a>(
    terms: impl IntoIterator<Item = &'a SmtTerm>,
) -> Result<Constraints, IntervalError> {
    let mut constraints = Constraints::default();
    let mut literals = Vec::new();
    for term in terms {
        literals.clear();
        flatten(term, true, &mut literals)?;
        for literal in &literals {
            constraints.add(literal)?;
        }
    }
    Ok(constraints)
}

/// Interpolating solver over the bound-literal fragment.
#[derive(Debug, Default)]
pub struct IntervalSolver {
    assertions: Vec<SmtTerm>,
    scopes: Vec<usize>,
    ref_counts: IndexMap<SmtTerm, usize>,
    last_check: Option<SatResult>,
}

impl IntervalSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding references across all tracked terms.
    pub fn live_references(&self) -> usize {
        self.ref_counts.values().sum()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn assertions(&self) -> &[SmtTerm] {
        &self.assertions
    }
}

impl FirstOrderSolver for IntervalSolver {
    type Error = IntervalError;

    fn push(&mut self) -> Result<(), Self::Error> {
        self.scopes.push(self.assertions.len());
        self.last_check = None;
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Self::Error> {
        let len = self.scopes.pop().ok_or(IntervalError::ScopeUnderflow)?;
        self.assertions.truncate(len);
        self.last_check = None;
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
        flatten(term, true, &mut Vec::new())?;
        self.assertions.push(term.clone());
        self.last_check = None;
        Ok(())
    }

    fn inc_ref(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
        *self.ref_counts.entry(term.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn dec_ref(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
        match self.ref_counts.get_mut(term) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.ref_counts.shift_remove(term);
            }
            None => {
                return Err(IntervalError::RefCountUnderflow {
                    term: to_smtlib(term),
                })
            }
        }
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Self::Error> {
        let result = if constraints_of(&self.assertions)?.is_sat() {
            SatResult::Sat
        } else {
            SatResult::Unsat
        };
        trace!(assertions = self.assertions.len(), ?result, "interval check");
        self.last_check = Some(result.clone());
        Ok(result)
    }

    fn collect_interpolants(&mut self) -> Result<Vec<SmtTerm>, Self::Error> {
        if self.last_check != Some(SatResult::Unsat) {
            return Err(IntervalError::NoUnsatProof);
        }
        let start = self.scopes.last().copied().unwrap_or(0);
        let scoped = &self.assertions[start..];
        let mut interpolants = Vec::new();
        for cut in 1..scoped.len() {
            let prefix = constraints_of(self.assertions[..start + cut].iter())?;
            if !prefix.is_sat() {
                interpolants.push(SmtTerm::bool(false));
                continue;
            }
            let suffix_vars = constraints_of(scoped[cut..].iter())?.variables();
            let shared: BTreeSet<String> = prefix
                .variables()
                .intersection(&suffix_vars)
                .cloned()
                .collect();
            interpolants.push(prefix.project(&shared));
        }
        Ok(interpolants)
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        *self = Self::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_eq(n: i64) -> SmtTerm {
        SmtTerm::var("x@1").eq(SmtTerm::int(n))
    }

    #[test]
    fn contradicting_equalities_are_unsat() {
        let mut solver = IntervalSolver::new();
        solver.push().unwrap();
        solver.assert(&x_eq(1)).unwrap();
        solver.assert(&x_eq(2)).unwrap();
        assert!(solver.is_unsat().unwrap());
        solver.pop().unwrap();
        assert!(!solver.is_unsat().unwrap());
    }

    #[test]
    fn excluded_endpoints_close_the_interval() {
        let mut solver = IntervalSolver::new();
        let v = || SmtTerm::var("v");
        solver.assert(&v().ge(SmtTerm::int(0))).unwrap();
        solver.assert(&SmtTerm::int(2).gt(v())).unwrap();
        solver.assert(&v().eq(SmtTerm::int(0)).not()).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResult::Sat);
        solver.assert(&v().eq(SmtTerm::int(1)).not()).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResult::Unsat);
    }

    #[test]
    fn boolean_atoms_conflict() {
        let mut solver = IntervalSolver::new();
        solver
            .assert(&SmtTerm::and(vec![SmtTerm::var("p"), SmtTerm::bool(true)]))
            .unwrap();
        solver.assert(&SmtTerm::var("p").not()).unwrap();
        assert!(solver.is_unsat().unwrap());
    }

    #[test]
    fn disjunctions_are_rejected() {
        let mut solver = IntervalSolver::new();
        let err = solver
            .assert(&SmtTerm::or(vec![x_eq(1), x_eq(2)]))
            .unwrap_err();
        assert!(matches!(err, IntervalError::UnsupportedTerm { .. }));
    }

    #[test]
    fn mixed_sorts_are_rejected_at_check() {
        let mut solver = IntervalSolver::new();
        solver.assert(&SmtTerm::var("p")).unwrap();
        solver.assert(&SmtTerm::var("p").lt(SmtTerm::int(3))).unwrap();
        assert_eq!(
            solver.check_sat().unwrap_err(),
            IntervalError::SortMismatch {
                var: "p".to_string()
            }
        );
    }

    #[test]
    fn interpolant_uses_only_shared_variables() {
        let mut solver = IntervalSolver::new();
        solver.push().unwrap();
        solver
            .assert(&SmtTerm::and(vec![
                x_eq(1),
                SmtTerm::var("y@1").ge(SmtTerm::int(7)),
            ]))
            .unwrap();
        solver.assert(&x_eq(2)).unwrap();
        assert!(solver.is_unsat().unwrap());

        let interpolants = solver.collect_interpolants().unwrap();
        assert_eq!(interpolants, vec![x_eq(1)]);
    }

    #[test]
    fn unsat_prefix_yields_false() {
        let mut solver = IntervalSolver::new();
        solver.push().unwrap();
        solver.assert(&SmtTerm::bool(false)).unwrap();
        solver.assert(&x_eq(1)).unwrap();
        solver.assert(&x_eq(1)).unwrap();
        assert!(solver.is_unsat().unwrap());
        let interpolants = solver.collect_interpolants().unwrap();
        assert_eq!(interpolants, vec![SmtTerm::bool(false), SmtTerm::bool(false)]);
    }

    #[test]
    fn interpolants_require_a_fresh_unsat_check() {
        let mut solver = IntervalSolver::new();
        solver.push().unwrap();
        solver.assert(&x_eq(1)).unwrap();
        solver.assert(&x_eq(2)).unwrap();
        assert_eq!(
            solver.collect_interpolants().unwrap_err(),
            IntervalError::NoUnsatProof
        );
        assert!(solver.is_unsat().unwrap());
        solver.assert(&x_eq(3)).unwrap();
        assert_eq!(
            solver.collect_interpolants().unwrap_err(),
            IntervalError::NoUnsatProof
        );
    }

    #[test]
    fn reference_counts_balance() {
        let mut solver = IntervalSolver::new();
        let t = x_eq(1);
        solver.inc_ref(&t).unwrap();
        solver.inc_ref(&t).unwrap();
        assert_eq!(solver.live_references(), 2);
        solver.dec_ref(&t).unwrap();
        solver.dec_ref(&t).unwrap();
        assert_eq!(solver.live_references(), 0);
        assert!(matches!(
            solver.dec_ref(&t),
            Err(IntervalError::RefCountUnderflow { .. })
        ));
    }

    #[test]
    fn pop_without_push_underflows() {
        let mut solver = IntervalSolver::new();
        assert_eq!(solver.pop().unwrap_err(), IntervalError::ScopeUnderflow);
    }
}
