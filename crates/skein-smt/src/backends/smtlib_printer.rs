use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Print a symbol, quoting it when it is not a simple SMT-LIB2 symbol.
pub fn symbol(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c));
    if simple {
        name.to_string()
    } else {
        format!("|{name}|")
    }
}

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    match term {
        SmtTerm::Var(name) => symbol(name),
        SmtTerm::IntLit(n) => {
            if *n < 0 {
                format!("(- {})", n.unsigned_abs())
            } else {
                n.to_string()
            }
        }
        SmtTerm::BoolLit(b) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        SmtTerm::Add(lhs, rhs) => format!("(+ {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Sub(lhs, rhs) => format!("(- {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Mul(lhs, rhs) => format!("(* {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Eq(lhs, rhs) => format!("(= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Lt(lhs, rhs) => format!("(< {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Le(lhs, rhs) => format!("(<= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Gt(lhs, rhs) => format!("(> {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Ge(lhs, rhs) => format!("(>= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::And(terms) => {
            if terms.is_empty() {
                "true".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(and {})", inner.join(" "))
            }
        }
        SmtTerm::Or(terms) => {
            if terms.is_empty() {
                "false".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(or {})", inner.join(" "))
            }
        }
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
        SmtTerm::Implies(lhs, rhs) => {
            format!("(=> {} {})", to_smtlib(lhs), to_smtlib(rhs))
        }
        SmtTerm::Ite(cond, then, els) => {
            format!(
                "(ite {} {} {})",
                to_smtlib(cond),
                to_smtlib(then),
                to_smtlib(els)
            )
        }
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Int => "Int",
    }
}

/// Infer the sort of every free variable of `terms`.
///
/// Variables in a boolean position are `Bool`, everything else defaults to
/// `Int`. Equalities propagate a known sort to the other side, so a second
/// pass settles chains like `(= a b)` where only `b` is used as a formula.
pub fn infer_sorts<'a>(
    terms: impl IntoIterator<Item = &'a SmtTerm> + Clone,
) -> BTreeMap<String, SmtSort> {
    let mut sorts = BTreeMap::new();
    for _ in 0..2 {
        for term in terms.clone() {
            infer(term, Some(SmtSort::Bool), &mut sorts);
        }
    }
    for term in terms {
        for var in term.variables() {
            sorts.entry(var).or_insert(SmtSort::Int);
        }
    }
    sorts
}

fn sort_of(term: &SmtTerm, sorts: &BTreeMap<String, SmtSort>) -> Option<SmtSort> {
    match term {
        SmtTerm::Var(name) => sorts.get(name).copied(),
        SmtTerm::IntLit(_) | SmtTerm::Add(..) | SmtTerm::Sub(..) | SmtTerm::Mul(..) => {
            Some(SmtSort::Int)
        }
        SmtTerm::Ite(_, then, els) => sort_of(then, sorts).or_else(|| sort_of(els, sorts)),
        _ => Some(SmtSort::Bool),
    }
}

fn infer(term: &SmtTerm, expected: Option<SmtSort>, sorts: &mut BTreeMap<String, SmtSort>) {
    match term {
        SmtTerm::Var(name) => {
            if let Some(sort) = expected {
                sorts.entry(name.clone()).or_insert(sort);
            }
        }
        SmtTerm::IntLit(_) | SmtTerm::BoolLit(_) => {}
        SmtTerm::Add(l, r)
        | SmtTerm::Sub(l, r)
        | SmtTerm::Mul(l, r)
        | SmtTerm::Lt(l, r)
        | SmtTerm::Le(l, r)
        | SmtTerm::Gt(l, r)
        | SmtTerm::Ge(l, r) => {
            infer(l, Some(SmtSort::Int), sorts);
            infer(r, Some(SmtSort::Int), sorts);
        }
        SmtTerm::Eq(l, r) => {
            let side = sort_of(l, sorts).or_else(|| sort_of(r, sorts));
            infer(l, side, sorts);
            infer(r, side, sorts);
        }
        SmtTerm::And(terms) | SmtTerm::Or(terms) => {
            for t in terms {
                infer(t, Some(SmtSort::Bool), sorts);
            }
        }
        SmtTerm::Not(inner) => infer(inner, Some(SmtSort::Bool), sorts),
        SmtTerm::Implies(l, r) => {
            infer(l, Some(SmtSort::Bool), sorts);
            infer(r, Some(SmtSort::Bool), sorts);
        }
        SmtTerm::Ite(c, t, e) => {
            infer(c, Some(SmtSort::Bool), sorts);
            let branch = expected.or_else(|| sort_of(t, sorts).or_else(|| sort_of(e, sorts)));
            infer(t, branch, sorts);
            infer(e, branch, sorts);
        }
    }
}

/// A complete SMT-LIB2 script asserting every block of a trace formula.
pub fn to_smtlib_script(blocks: &[SmtTerm]) -> String {
    let mut out = String::new();
    for (name, sort) in infer_sorts(blocks.iter()) {
        let _ = writeln!(
            out,
            "(declare-const {} {})",
            symbol(&name),
            sort_to_smtlib(&sort)
        );
    }
    for block in blocks {
        let _ = writeln!(out, "(assert {})", to_smtlib(block));
    }
    out.push_str("(check-sat)\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_simple_term() {
        let term = SmtTerm::var("x").add(SmtTerm::int(1)).ge(SmtTerm::int(0));
        assert_eq!(to_smtlib(&term), "(>= (+ x 1) 0)");
    }

    #[test]
    fn print_and_term() {
        let term = SmtTerm::and(vec![
            SmtTerm::var("a").gt(SmtTerm::int(0)),
            SmtTerm::var("b").lt(SmtTerm::int(10)),
        ]);
        assert_eq!(to_smtlib(&term), "(and (> a 0) (< b 10))");
    }

    #[test]
    fn qualified_names_are_quoted() {
        assert_eq!(symbol("x@3"), "x@3");
        assert_eq!(symbol("Sprite1::x@3"), "|Sprite1::x@3|");
        assert_eq!(symbol("1x"), "|1x|");
    }

    #[test]
    fn boolean_positions_infer_bool_sort() {
        let terms = [
            SmtTerm::and(vec![SmtTerm::var("p"), SmtTerm::var("n").lt(SmtTerm::int(3))]),
            SmtTerm::var("q").eq(SmtTerm::var("p")),
            SmtTerm::var("m").eq(SmtTerm::var("n")),
        ];
        let sorts = infer_sorts(terms.iter());
        assert_eq!(sorts.get("p"), Some(&SmtSort::Bool));
        assert_eq!(sorts.get("q"), Some(&SmtSort::Bool));
        assert_eq!(sorts.get("n"), Some(&SmtSort::Int));
        assert_eq!(sorts.get("m"), Some(&SmtSort::Int));
    }

    #[test]
    fn script_declares_asserts_and_checks() {
        let blocks = [
            SmtTerm::var("x@1").eq(SmtTerm::int(1)),
            SmtTerm::var("x@1").eq(SmtTerm::int(2)),
        ];
        let script = to_smtlib_script(&blocks);
        assert_eq!(
            script,
            "(declare-const x@1 Int)\n(assert (= x@1 1))\n(assert (= x@1 2))\n(check-sat)\n"
        );
    }
}
