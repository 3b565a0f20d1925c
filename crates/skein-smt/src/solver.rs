use crate::backends::smtlib_printer::to_smtlib;
use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

/// Interpolating first-order solver, as consumed by abstraction refinement.
///
/// Formulas handed to the solver are reference counted: a caller that keeps
/// a formula alive across solver calls brackets it with [`inc_ref`] and
/// [`dec_ref`]. Interpolants are only meaningful immediately after a check
/// that returned [`SatResult::Unsat`] and are ordered along the asserted
/// sequence of the innermost scope.
///
/// [`inc_ref`]: FirstOrderSolver::inc_ref
/// [`dec_ref`]: FirstOrderSolver::dec_ref
pub trait FirstOrderSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Push a new assertion scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop the innermost assertion scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Assert a formula in the current scope.
    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    fn inc_ref(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    fn dec_ref(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    /// Check satisfiability of all asserted formulas.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// True only if the assertions were proven unsatisfiable.
    fn is_unsat(&mut self) -> Result<bool, Self::Error> {
        Ok(self.check_sat()? == SatResult::Unsat)
    }

    /// Craig interpolants for the cuts between the asserted formulas.
    fn collect_interpolants(&mut self) -> Result<Vec<SmtTerm>, Self::Error>;

    /// Textual form of a formula, used for diagnostics.
    fn string_representation(&self, term: &SmtTerm) -> String {
        to_smtlib(term)
    }

    /// Reset the solver state.
    fn reset(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct MockSolver {
        sat_result: SatResult,
        check_sat_calls: usize,
        reset_calls: usize,
    }

    impl MockSolver {
        fn new(sat_result: SatResult) -> Self {
            Self {
                sat_result,
                check_sat_calls: 0,
                reset_calls: 0,
            }
        }
    }

    impl FirstOrderSolver for MockSolver {
        type Error = io::Error;

        fn push(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn pop(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn assert(&mut self, _term: &SmtTerm) -> Result<(), Self::Error> {
            Ok(())
        }

        fn inc_ref(&mut self, _term: &SmtTerm) -> Result<(), Self::Error> {
            Ok(())
        }

        fn dec_ref(&mut self, _term: &SmtTerm) -> Result<(), Self::Error> {
            Ok(())
        }

        fn check_sat(&mut self) -> Result<SatResult, Self::Error> {
            self.check_sat_calls += 1;
            Ok(self.sat_result.clone())
        }

        fn collect_interpolants(&mut self) -> Result<Vec<SmtTerm>, Self::Error> {
            Ok(Vec::new())
        }

        fn reset(&mut self) -> Result<(), Self::Error> {
            self.reset_calls += 1;
            Ok(())
        }
    }

    #[test]
    fn is_unsat_delegates_to_check_sat() {
        let mut solver = MockSolver::new(SatResult::Unsat);
        assert!(solver.is_unsat().expect("is_unsat should succeed"));
        assert_eq!(solver.check_sat_calls, 1);
    }

    #[test]
    fn unknown_is_not_an_unsat_proof() {
        let mut solver = MockSolver::new(SatResult::Unknown("timeout".to_string()));
        assert!(!solver.is_unsat().expect("is_unsat should succeed"));

        solver.reset().expect("reset should succeed");
        assert_eq!(solver.reset_calls, 1);
    }

    #[test]
    fn default_string_representation_is_smtlib() {
        let solver = MockSolver::new(SatResult::Sat);
        let term = SmtTerm::var("x@1").le(SmtTerm::int(-3));
        assert_eq!(solver.string_representation(&term), "(<= x@1 (- 3))");
    }
}
