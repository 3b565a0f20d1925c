//! The seam between the control analysis and the data analysis it wraps.

use std::fmt;

use skein_ir::ids::LocationId;
use skein_ir::ops::ProgramOperation;
use skein_ir::program::{App, Concern};
use skein_ir::transition::TransitionRelation;

use crate::error::{AnalysisError, AnalysisResult};

/// Transfer relation of the wrapped data analysis.
///
/// Operations arrive with every variable already qualified. Control
/// statements the scheduler handles itself are never passed in, but
/// epsilon operations may be.
pub trait WrappedTransfer {
    type State: Clone + fmt::Debug + PartialEq;

    /// Successors of `state` under `op`; empty when `op` is infeasible.
    fn abstract_succ_for(
        &self,
        state: &Self::State,
        op: &ProgramOperation,
        concern: Concern,
    ) -> AnalysisResult<Vec<Self::State>>;

    /// Whether `state` can describe a concrete state.
    fn is_feasible(&self, _state: &Self::State) -> bool {
        true
    }
}

/// Apply `ops` in sequence.
pub fn transfer_with_intermediate_ops<'o, X: WrappedTransfer>(
    transfer: &X,
    state: &X::State,
    ops: impl IntoIterator<Item = &'o ProgramOperation>,
    concern: Concern,
) -> AnalysisResult<Vec<X::State>> {
    let mut states = vec![state.clone()];
    for op in ops {
        if op.is_epsilon() {
            continue;
        }
        let mut next = Vec::with_capacity(states.len());
        for s in &states {
            next.extend(transfer.abstract_succ_for(s, op, concern)?);
        }
        states = next;
    }
    Ok(states)
}

/// Run the loop-free relation `relation` from `from` to completion.
///
/// Returns every final wrapped state together with whether it was reached
/// at an exit location. `scope` qualifies each operation before transfer.
pub fn transfer_along_transition_system<X: WrappedTransfer>(
    transfer: &X,
    app: &App,
    state: &X::State,
    relation: &TransitionRelation,
    from: LocationId,
    concern: Concern,
    scope: &dyn Fn(&ProgramOperation) -> AnalysisResult<ProgramOperation>,
) -> AnalysisResult<Vec<(X::State, bool)>> {
    if relation.has_loops() {
        return Err(AnalysisError::unsupported(format!(
            "transfer along relation '{}' with loops",
            relation.name()
        )));
    }

    let mut finished = Vec::new();
    let mut worklist = vec![(from, state.clone())];
    while let Some((location, current)) = worklist.pop() {
        let leaving = relation.transitions_from(location);
        let at_exit = relation.exit_locations().contains(&location);
        if at_exit || leaving.is_empty() {
            finished.push((current.clone(), at_exit));
        }
        for (op_id, to) in leaving {
            let op = app.operation(op_id)?;
            if op.is_epsilon() {
                worklist.push((to, current.clone()));
                continue;
            }
            let scoped = scope(&op)?;
            for succ in transfer.abstract_succ_for(&current, &scoped, concern)? {
                if transfer.is_feasible(&succ) {
                    worklist.push((to, succ));
                }
            }
        }
    }
    Ok(finished)
}
