//! Refinement half of the CEGAR loop.
//!
//! [`AbstractionRefiner::check_is_feasible`] decides whether an abstract
//! counterexample is real. When it is not, the interpolants of the trace
//! are kept in a single slot until [`AbstractionRefiner::refine_precision`]
//! folds them into the precision and restarts exploration.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::time::Instant;

use skein_smt::backends::smtlib_printer::to_smtlib_script;
use skein_smt::solver::{FirstOrderSolver, SatResult};
use skein_smt::terms::SmtTerm;
use skein_smt::theories::{SmtTheories, Theories};
use tracing::{debug, info, info_span, warn};

use crate::abstraction::{
    AbstractionState, AccessibilityRelation, FrontierSet, ReachedSet, StateId,
};
use crate::config::AbstractionRefinerConfig;
use crate::error::{AnalysisError, AnalysisResult, ContractViolation};
use crate::precision::{PredicatePrecision, PredicateRole};

/// Interpolants of the last infeasible trace, keyed by its target.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationSolution {
    pub target: StateId,
    pub interpolants: Vec<SmtTerm>,
}

pub struct AbstractionRefiner<S: FirstOrderSolver, T: Theories = SmtTheories> {
    solver: S,
    theories: T,
    config: AbstractionRefinerConfig,
    current_precision: PredicatePrecision,
    last_solution: Option<InterpolationSolution>,
    checks: usize,
}

impl<S: FirstOrderSolver> AbstractionRefiner<S, SmtTheories> {
    pub fn new(solver: S, config: AbstractionRefinerConfig) -> Self {
        Self::with_theories(solver, SmtTheories, config)
    }
}

impl<S: FirstOrderSolver, T: Theories> AbstractionRefiner<S, T> {
    pub fn with_theories(solver: S, theories: T, config: AbstractionRefinerConfig) -> Self {
        AbstractionRefiner {
            solver,
            theories,
            config,
            current_precision: PredicatePrecision::bottom(),
            last_solution: None,
            checks: 0,
        }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn current_precision(&self) -> &PredicatePrecision {
        &self.current_precision
    }

    pub fn cached_solution(&self) -> Option<&InterpolationSolution> {
        self.last_solution.as_ref()
    }

    /// Precision to abstract `state` with: its own stack joined onto the
    /// global precision.
    pub fn precision_for(&self, state: &AbstractionState) -> PredicatePrecision {
        state
            .precision_stack
            .iter()
            .fold(self.current_precision.clone(), |acc, p| acc.join(p))
    }

    /// Check whether the trace to `target` is feasible.
    ///
    /// Returns `true` for a real counterexample. On `false` the trace's
    /// interpolants are cached for the next [`refine_precision`] call.
    /// Any previously cached solution is dropped.
    ///
    /// [`refine_precision`]: Self::refine_precision
    pub fn check_is_feasible<A: AccessibilityRelation>(
        &mut self,
        reached: &ReachedSet,
        ar: &A,
        target: StateId,
        purpose: Option<&str>,
    ) -> AnalysisResult<bool> {
        if let Some(stale) = self.last_solution.take() {
            self.release(&stale.interpolants)?;
        }
        self.checks += 1;
        let span = info_span!(
            "feasibility_check",
            check = self.checks,
            purpose = purpose.unwrap_or("-")
        );
        let _guard = span.enter();
        let started = Instant::now();

        let sequence = ar.widened_sequence(target)?;
        let mut blocks = Vec::with_capacity(sequence.len());
        let mut ssa_maps = Vec::with_capacity(sequence.len());
        for id in &sequence {
            let state = ar
                .abstraction_state(*id)
                .ok_or(ContractViolation::UnknownState(*id))?;
            let source = match state.widening_of {
                Some(of) => ar
                    .abstraction_state(of)
                    .ok_or(ContractViolation::UnknownState(of))?,
                None => state,
            };
            blocks.push(source.block_formula.clone());
            ssa_maps.push(source.ssa_map.clone());
        }
        let trace = self.theories.align_ssa_indices(&blocks, &ssa_maps)?;
        debug!(reached = reached.len(), blocks = trace.len(), "checking trace");

        if self.config.dump_path_formula {
            self.dump(&trace)?;
        }

        for (i, formula) in trace.iter().enumerate() {
            if let Err(err) = self.solver.inc_ref(formula) {
                self.roll_back(&trace[..i]);
                return Err(AnalysisError::solver(err));
            }
        }
        let outcome = self.solve(&trace);
        let released = self.release(&trace);
        let outcome = outcome?;
        released?;

        let Some(interpolants) = outcome else {
            info!(
                trace_len = trace.len(),
                feasible = true,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "trace is feasible"
            );
            return Ok(true);
        };

        if interpolants.is_empty() {
            return Err(ContractViolation::NoInterpolants { target }.into());
        }
        for (i, interpolant) in interpolants.iter().enumerate() {
            if let Err(err) = self.solver.inc_ref(interpolant) {
                self.roll_back(&interpolants[..i]);
                return Err(AnalysisError::solver(err));
            }
        }
        let non_trivial = interpolants
            .iter()
            .filter(|i| !i.is_true() && !i.is_false())
            .count();
        info!(
            trace_len = trace.len(),
            feasible = false,
            interpolants = interpolants.len(),
            non_trivial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trace is infeasible"
        );
        self.last_solution = Some(InterpolationSolution {
            target,
            interpolants,
        });
        Ok(false)
    }

    /// Fold the cached interpolants into the precision and restart
    /// exploration from the initial states.
    ///
    /// Must directly follow a [`check_is_feasible`] that returned `false`
    /// for `infeasible`. The cached solution is released on every path.
    ///
    /// [`check_is_feasible`]: Self::check_is_feasible
    pub fn refine_precision<A: AccessibilityRelation>(
        &mut self,
        frontier: &mut FrontierSet,
        reached: &mut ReachedSet,
        ar: &A,
        infeasible: StateId,
    ) -> AnalysisResult<()> {
        let solution = self
            .last_solution
            .take()
            .ok_or(ContractViolation::MissingInterpolationSolution)?;
        let applied = self.apply(&solution, frontier, reached, ar, infeasible);
        let released = self.release(&solution.interpolants);
        applied?;
        released
    }

    fn apply<A: AccessibilityRelation>(
        &mut self,
        solution: &InterpolationSolution,
        frontier: &mut FrontierSet,
        reached: &mut ReachedSet,
        ar: &A,
        infeasible: StateId,
    ) -> AnalysisResult<()> {
        if solution.target != infeasible {
            return Err(ContractViolation::MismatchedTarget {
                cached: solution.target,
                requested: infeasible,
            }
            .into());
        }
        if self.config.use_lazy_abstraction {
            return Err(AnalysisError::unsupported("lazy abstraction refinement"));
        }

        let learned = solution.interpolants.iter().fold(
            PredicatePrecision::bottom(),
            |acc, interpolant| {
                acc.join(&PredicatePrecision::of(
                    interpolant.clone(),
                    PredicateRole::Intermediate,
                ))
            },
        );
        self.current_precision = self.current_precision.join(&learned);
        debug!(precision = %self.current_precision, "refined precision");

        let initial = ar.initial();
        let mut seen: BTreeSet<StateId> = initial.iter().copied().collect();
        for root in &initial {
            let mut queue: VecDeque<StateId> = ar.successors_of(*root).into();
            while let Some(state) = queue.pop_front() {
                if !seen.insert(state) {
                    continue;
                }
                reached.remove(state);
                frontier.remove(state);
                queue.extend(ar.successors_of(state));
            }
            frontier.insert(*root);
        }
        debug!(
            reached = reached.len(),
            frontier = frontier.len(),
            "exploration restarted"
        );
        Ok(())
    }

    /// `Some(interpolants)` when the trace is infeasible.
    fn solve(&mut self, trace: &[SmtTerm]) -> AnalysisResult<Option<Vec<SmtTerm>>> {
        self.solver.push().map_err(AnalysisError::solver)?;
        let outcome = self.assert_and_check(trace);
        let popped = self.solver.pop().map_err(AnalysisError::solver);
        let outcome = outcome?;
        popped?;
        Ok(outcome)
    }

    fn assert_and_check(&mut self, trace: &[SmtTerm]) -> AnalysisResult<Option<Vec<SmtTerm>>> {
        for formula in trace {
            self.solver.assert(formula).map_err(AnalysisError::solver)?;
        }
        match self.solver.check_sat().map_err(AnalysisError::solver)? {
            SatResult::Sat => Ok(None),
            SatResult::Unsat => Ok(Some(
                self.solver
                    .collect_interpolants()
                    .map_err(AnalysisError::solver)?,
            )),
            SatResult::Unknown(reason) => Err(AnalysisError::Solver(format!(
                "satisfiability of the trace is unknown: {reason}"
            ))),
        }
    }

    /// Drop one reference to each of `terms`, reporting the first failure.
    fn release(&mut self, terms: &[SmtTerm]) -> AnalysisResult<()> {
        let mut first_error = None;
        for term in terms {
            if let Err(err) = self.solver.dec_ref(term) {
                first_error.get_or_insert(AnalysisError::solver(err));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Undo the references taken before a failed `inc_ref`. The failure
    /// being reported wins; release errors here are only logged.
    fn roll_back(&mut self, taken: &[SmtTerm]) {
        for term in taken {
            if let Err(err) = self.solver.dec_ref(term) {
                warn!(term = %term, error = %err, "reference release failed during rollback");
            }
        }
    }

    fn dump(&self, trace: &[SmtTerm]) -> AnalysisResult<()> {
        let dir = &self.config.dump_directory;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("refinement-{}-path.smt", self.checks));
        fs::write(&path, to_smtlib_script(trace))?;
        info!(path = %path.display(), "path formula written");
        Ok(())
    }
}
