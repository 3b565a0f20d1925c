use crate::ssa::{self, SsaMap, TermError};
use crate::terms::SmtTerm;

/// Boolean algebra and trace alignment over first-order formulas.
pub trait Theories {
    fn true_bool(&self) -> SmtTerm;

    fn false_bool(&self) -> SmtTerm;

    /// Conjunction of `formulas`.
    fn and(&self, formulas: Vec<SmtTerm>) -> SmtTerm;

    /// Rewrite per-block formulas onto a single SSA numbering.
    fn align_ssa_indices(
        &self,
        formulas: &[SmtTerm],
        ssa_maps: &[SsaMap],
    ) -> Result<Vec<SmtTerm>, TermError>;
}

/// Theories over [`SmtTerm`] as produced by this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtTheories;

impl Theories for SmtTheories {
    fn true_bool(&self) -> SmtTerm {
        SmtTerm::bool(true)
    }

    fn false_bool(&self) -> SmtTerm {
        SmtTerm::bool(false)
    }

    fn and(&self, formulas: Vec<SmtTerm>) -> SmtTerm {
        let mut conjuncts = Vec::with_capacity(formulas.len());
        for formula in formulas {
            match formula {
                SmtTerm::BoolLit(true) => {}
                SmtTerm::BoolLit(false) => return SmtTerm::bool(false),
                SmtTerm::And(inner) => {
                    for t in inner {
                        if t.is_false() {
                            return SmtTerm::bool(false);
                        }
                        if !t.is_true() {
                            conjuncts.push(t);
                        }
                    }
                }
                other => conjuncts.push(other),
            }
        }
        match conjuncts.len() {
            0 => SmtTerm::bool(true),
            1 => conjuncts.remove(0),
            _ => SmtTerm::and(conjuncts),
        }
    }

    fn align_ssa_indices(
        &self,
        formulas: &[SmtTerm],
        ssa_maps: &[SsaMap],
    ) -> Result<Vec<SmtTerm>, TermError> {
        ssa::align_ssa_indices(formulas, ssa_maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjunction_drops_units_and_flattens() {
        let th = SmtTheories;
        let a = SmtTerm::var("a");
        let b = SmtTerm::var("b").lt(SmtTerm::int(2));
        let conj = th.and(vec![
            th.true_bool(),
            SmtTerm::and(vec![a.clone(), th.true_bool()]),
            b.clone(),
        ]);
        assert_eq!(conj, SmtTerm::and(vec![a, b]));
    }

    #[test]
    fn conjunction_with_false_is_false() {
        let th = SmtTheories;
        let conj = th.and(vec![SmtTerm::var("a"), th.false_bool()]);
        assert!(conj.is_false());
        assert!(th.and(Vec::new()).is_true());
    }
}
