use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;

use crate::backends::smtlib_printer::to_smtlib;

/// Abstract first-order term, solver-agnostic.
///
/// Terms are hashable so that solvers can keep reference counts keyed by
/// the term itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    pub fn add(self, other: SmtTerm) -> Self {
        SmtTerm::Add(Box::new(self), Box::new(other))
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        SmtTerm::Sub(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        SmtTerm::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, SmtTerm::BoolLit(false))
    }

    /// Names of all variables occurring in the term.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            SmtTerm::Var(name) => {
                out.insert(name.clone());
            }
            SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            SmtTerm::And(terms) | SmtTerm::Or(terms) => {
                for t in terms {
                    t.collect_variables(out);
                }
            }
            SmtTerm::Not(inner) => inner.collect_variables(out),
            SmtTerm::Ite(c, t, e) => {
                c.collect_variables(out);
                t.collect_variables(out);
                e.collect_variables(out);
            }
        }
    }

    /// Rewrite every variable name with `f`.
    pub fn rename_variables(&self, mut f: impl FnMut(&str) -> String) -> SmtTerm {
        match self.try_rename_variables(&mut |name| Ok::<_, Infallible>(f(name))) {
            Ok(term) => term,
            Err(never) => match never {},
        }
    }

    /// Rewrite every variable name with `f`, stopping at the first error.
    pub fn try_rename_variables<E>(
        &self,
        f: &mut dyn FnMut(&str) -> Result<String, E>,
    ) -> Result<SmtTerm, E> {
        fn pair<E>(
            l: &SmtTerm,
            r: &SmtTerm,
            f: &mut dyn FnMut(&str) -> Result<String, E>,
        ) -> Result<(Box<SmtTerm>, Box<SmtTerm>), E> {
            Ok((
                Box::new(l.try_rename_variables(f)?),
                Box::new(r.try_rename_variables(f)?),
            ))
        }

        Ok(match self {
            SmtTerm::Var(name) => SmtTerm::Var(f(name)?),
            SmtTerm::IntLit(n) => SmtTerm::IntLit(*n),
            SmtTerm::BoolLit(b) => SmtTerm::BoolLit(*b),
            SmtTerm::Add(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Add(l, r)
            }
            SmtTerm::Sub(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Sub(l, r)
            }
            SmtTerm::Mul(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Mul(l, r)
            }
            SmtTerm::Eq(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Eq(l, r)
            }
            SmtTerm::Lt(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Lt(l, r)
            }
            SmtTerm::Le(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Le(l, r)
            }
            SmtTerm::Gt(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Gt(l, r)
            }
            SmtTerm::Ge(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Ge(l, r)
            }
            SmtTerm::Implies(l, r) => {
                let (l, r) = pair(l, r, f)?;
                SmtTerm::Implies(l, r)
            }
            SmtTerm::And(terms) => SmtTerm::And(
                terms
                    .iter()
                    .map(|t| t.try_rename_variables(&mut *f))
                    .collect::<Result<_, _>>()?,
            ),
            SmtTerm::Or(terms) => SmtTerm::Or(
                terms
                    .iter()
                    .map(|t| t.try_rename_variables(&mut *f))
                    .collect::<Result<_, _>>()?,
            ),
            SmtTerm::Not(inner) => SmtTerm::Not(Box::new(inner.try_rename_variables(f)?)),
            SmtTerm::Ite(c, t, e) => SmtTerm::Ite(
                Box::new(c.try_rename_variables(f)?),
                Box::new(t.try_rename_variables(f)?),
                Box::new(e.try_rename_variables(f)?),
            ),
        })
    }
}

impl fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_smtlib(self))
    }
}
