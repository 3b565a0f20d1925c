//! Abstraction states and the accessibility relation over them.
//!
//! Explored states live in an arena and are addressed by [`StateId`]. The
//! link from a widening state to the state it widened is an id into the
//! same arena and never keeps that state alive.

use std::fmt;

use indexmap::IndexSet;
use skein_smt::ssa::SsaMap;
use skein_smt::terms::SmtTerm;

use crate::error::{AnalysisResult, ContractViolation};
use crate::precision::PredicatePrecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The predicate-abstraction component of an explored state.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractionState {
    /// Whether abstraction (widening) was applied at this state.
    pub is_widening: bool,
    /// The state whose block was widened into this one.
    pub widening_of: Option<StateId>,
    /// Precisions pushed by enclosing blocks, innermost last.
    pub precision_stack: Vec<PredicatePrecision>,
    /// Formula of the block ending in this state, with block-local SSA indices.
    pub block_formula: SmtTerm,
    /// Highest SSA index per variable written in the block.
    pub ssa_map: SsaMap,
}

impl AbstractionState {
    pub fn new(block_formula: SmtTerm, ssa_map: SsaMap) -> Self {
        AbstractionState {
            is_widening: false,
            widening_of: None,
            precision_stack: Vec::new(),
            block_formula,
            ssa_map,
        }
    }

    /// A widening point holding its own block.
    pub fn widening(block_formula: SmtTerm, ssa_map: SsaMap) -> Self {
        AbstractionState {
            is_widening: true,
            ..Self::new(block_formula, ssa_map)
        }
    }

    /// A widening point whose block is the one of `of`.
    pub fn widening_of(of: StateId) -> Self {
        AbstractionState {
            is_widening: true,
            widening_of: Some(of),
            ..Self::new(SmtTerm::bool(true), SsaMap::new())
        }
    }

    pub fn with_precision(mut self, precision: PredicatePrecision) -> Self {
        self.precision_stack.push(precision);
        self
    }
}

/// Read access to an abstract reachability graph.
pub trait AccessibilityRelation {
    fn initial(&self) -> Vec<StateId>;

    fn successors_of(&self, state: StateId) -> Vec<StateId>;

    /// The state `state` was discovered from; `None` for initial states.
    fn predecessor_of(&self, state: StateId) -> Option<StateId>;

    fn abstraction_state(&self, state: StateId) -> Option<&AbstractionState>;

    /// Widening states on the path from the root to `target`, in path
    /// order. The target always closes the sequence.
    fn widened_sequence(&self, target: StateId) -> AnalysisResult<Vec<StateId>> {
        if self.abstraction_state(target).is_none() {
            return Err(ContractViolation::UnknownState(target).into());
        }
        let mut sequence = vec![target];
        let mut current = self.predecessor_of(target);
        while let Some(state) = current {
            let abstraction = self
                .abstraction_state(state)
                .ok_or(ContractViolation::UnknownState(state))?;
            if abstraction.is_widening {
                sequence.push(state);
            }
            current = self.predecessor_of(state);
        }
        sequence.reverse();
        Ok(sequence)
    }
}

#[derive(Debug, Clone)]
struct Node {
    state: AbstractionState,
    parent: Option<StateId>,
    children: Vec<StateId>,
}

/// Arena-backed reachability graph.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityGraph {
    nodes: Vec<Node>,
    initial: Vec<StateId>,
}

impl ReachabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_initial(&mut self, state: AbstractionState) -> StateId {
        let id = self.push(state, None);
        self.initial.push(id);
        id
    }

    pub fn add_successor(
        &mut self,
        parent: StateId,
        state: AbstractionState,
    ) -> AnalysisResult<StateId> {
        if parent.0 >= self.nodes.len() {
            return Err(ContractViolation::UnknownState(parent).into());
        }
        let id = self.push(state, Some(parent));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    fn push(&mut self, state: AbstractionState, parent: Option<StateId>) -> StateId {
        let id = StateId(self.nodes.len());
        self.nodes.push(Node {
            state,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl AccessibilityRelation for ReachabilityGraph {
    fn initial(&self) -> Vec<StateId> {
        self.initial.clone()
    }

    fn successors_of(&self, state: StateId) -> Vec<StateId> {
        self.nodes
            .get(state.0)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn predecessor_of(&self, state: StateId) -> Option<StateId> {
        self.nodes.get(state.0).and_then(|n| n.parent)
    }

    fn abstraction_state(&self, state: StateId) -> Option<&AbstractionState> {
        self.nodes.get(state.0).map(|n| &n.state)
    }
}

/// Insertion-ordered set of explored states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSet {
    states: IndexSet<StateId>,
}

pub type ReachedSet = StateSet;
pub type FrontierSet = StateSet;

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: StateId) -> bool {
        self.states.insert(state)
    }

    pub fn remove(&mut self, state: StateId) -> bool {
        self.states.shift_remove(&state)
    }

    pub fn contains(&self, state: StateId) -> bool {
        self.states.contains(&state)
    }

    /// Remove and return the oldest state.
    pub fn pop(&mut self) -> Option<StateId> {
        self.states.shift_remove_index(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<StateId> for StateSet {
    fn from_iter<I: IntoIterator<Item = StateId>>(iter: I) -> Self {
        StateSet {
            states: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(v: &str, n: i64) -> AbstractionState {
        AbstractionState::new(SmtTerm::var(v).eq(SmtTerm::int(n)), SsaMap::new())
    }

    #[test]
    fn widened_sequence_keeps_widening_states_and_target() {
        let mut graph = ReachabilityGraph::new();
        let root =
            graph.add_initial(AbstractionState::widening(SmtTerm::bool(true), SsaMap::new()));
        let a = graph.add_successor(root, block("x@0", 1)).unwrap();
        let b = graph
            .add_successor(a, AbstractionState::widening(SmtTerm::bool(true), SsaMap::new()))
            .unwrap();
        let c = graph.add_successor(b, block("x@0", 2)).unwrap();

        assert_eq!(graph.widened_sequence(c).unwrap(), vec![root, b, c]);
        assert_eq!(graph.widened_sequence(root).unwrap(), vec![root]);
        assert_eq!(graph.successors_of(root), vec![a]);
    }

    #[test]
    fn unknown_states_are_contract_violations() {
        let graph = ReachabilityGraph::new();
        assert!(graph.widened_sequence(StateId(3)).is_err());
    }

    #[test]
    fn frontier_pops_in_insertion_order() {
        let mut frontier: FrontierSet = [StateId(2), StateId(0), StateId(1)].into_iter().collect();
        assert!(!frontier.insert(StateId(0)));
        assert_eq!(frontier.pop(), Some(StateId(2)));
        assert!(frontier.remove(StateId(1)));
        assert_eq!(frontier.iter().collect::<Vec<_>>(), vec![StateId(0)]);
    }
}
