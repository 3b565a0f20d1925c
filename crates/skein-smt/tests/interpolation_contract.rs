//! Craig interpolation contract of the interval backend, checked with the
//! backend itself: for an unsatisfiable `A ∧ B` the interpolant `I` is
//! entailed by `A`, inconsistent with `B`, and mentions only shared symbols.

use proptest::prelude::*;
use skein_smt::backends::interval::IntervalSolver;
use skein_smt::solver::{FirstOrderSolver, SatResult};
use skein_smt::terms::SmtTerm;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn literal() -> impl Strategy<Value = SmtTerm> {
    (
        prop::sample::select(vec!["a@1", "b@1", "c@1"]),
        0usize..5,
        -3i64..4,
        any::<bool>(),
    )
        .prop_map(|(var, rel, value, negate)| {
            let v = SmtTerm::var(var);
            let c = SmtTerm::int(value);
            let atom = match rel {
                0 => v.eq(c),
                1 => v.lt(c),
                2 => v.le(c),
                3 => c.gt(v),
                _ => v.ge(c),
            };
            if negate {
                atom.not()
            } else {
                atom
            }
        })
}

fn conjuncts(term: &SmtTerm) -> Vec<SmtTerm> {
    match term {
        SmtTerm::And(terms) => terms.clone(),
        other => vec![other.clone()],
    }
}

fn unsat(terms: &[SmtTerm]) -> Result<bool, Box<dyn std::error::Error>> {
    let mut solver = IntervalSolver::new();
    for t in terms {
        solver.assert(t)?;
    }
    Ok(solver.check_sat()? == SatResult::Unsat)
}

#[test]
fn three_block_trace_yields_two_interpolants() -> TestResult {
    let mut solver = IntervalSolver::new();
    solver.push()?;
    solver.assert(&SmtTerm::var("x@1").eq(SmtTerm::int(0)))?;
    solver.assert(&SmtTerm::var("y@1").ge(SmtTerm::int(5)))?;
    solver.assert(&SmtTerm::var("x@1").gt(SmtTerm::int(0)))?;
    assert!(solver.is_unsat()?);

    let interpolants = solver.collect_interpolants()?;
    assert_eq!(interpolants.len(), 2);
    assert_eq!(interpolants[0], SmtTerm::var("x@1").eq(SmtTerm::int(0)));
    assert_eq!(interpolants[1], SmtTerm::var("x@1").eq(SmtTerm::int(0)));
    solver.pop()?;
    assert_eq!(solver.scope_depth(), 0);
    Ok(())
}

proptest! {
    #[test]
    fn interpolant_separates_prefix_from_suffix(
        prefix in prop::collection::vec(literal(), 1..4),
        suffix in prop::collection::vec(literal(), 1..4),
    ) {
        let a = SmtTerm::and(prefix);
        let b = SmtTerm::and(suffix);

        let mut solver = IntervalSolver::new();
        solver.push().unwrap();
        solver.assert(&a).unwrap();
        solver.assert(&b).unwrap();
        prop_assume!(solver.is_unsat().unwrap());

        let interpolants = solver.collect_interpolants().unwrap();
        prop_assert_eq!(interpolants.len(), 1);
        let itp = &interpolants[0];

        for conjunct in conjuncts(itp) {
            prop_assert!(unsat(&[a.clone(), conjunct.not()]).unwrap());
        }
        prop_assert!(unsat(&[itp.clone(), b.clone()]).unwrap());

        let shared: Vec<String> = a.variables().intersection(&b.variables()).cloned().collect();
        for var in itp.variables() {
            prop_assert!(shared.contains(&var));
        }
    }
}
