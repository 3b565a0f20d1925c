//! Thread and control states.
//!
//! Both are persistent values: every update returns a new value sharing
//! structure with the old one, so states can be kept in the explored graph
//! without copying.

use std::fmt;
use std::sync::Arc;

use im::{OrdMap, OrdSet, Vector};
use skein_ir::ast::{Property, Variable};
use skein_ir::ids::{ActorId, LocationId, RelationId, ScriptId, ThreadId};
use skein_ir::ops::ProgramOperation;

/// Scheduling state of a modeled thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThreadComputationState {
    Running,
    /// Running inside an atomic block; never stored, derived from the
    /// nesting counter.
    RunningAtomic,
    /// Runnable, waiting for its turn.
    Yield,
    /// Blocked on other threads.
    Wait,
    Done,
    /// A monitored property was violated.
    Failure,
    /// Not activated yet.
    Disabled,
}

impl fmt::Display for ThreadComputationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadComputationState::Running => "RUNNING",
            ThreadComputationState::RunningAtomic => "RUNNING_ATOMIC",
            ThreadComputationState::Yield => "YIELD",
            ThreadComputationState::Wait => "WAIT",
            ThreadComputationState::Done => "DONE",
            ThreadComputationState::Failure => "FAILURE",
            ThreadComputationState::Disabled => "DISABLED",
        };
        f.write_str(name)
    }
}

/// A control location of a specific actor's relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationLocation {
    pub actor: ActorId,
    pub relation: RelationId,
    pub location: LocationId,
}

impl RelationLocation {
    pub fn new(actor: ActorId, relation: RelationId, location: LocationId) -> Self {
        RelationLocation {
            actor,
            relation,
            location,
        }
    }

    pub fn at(&self, location: LocationId) -> Self {
        RelationLocation {
            location,
            ..self.clone()
        }
    }
}

impl fmt::Display for RelationLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.actor, self.relation, self.location)
    }
}

/// A pending method call: where it was issued and where to continue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodCall {
    pub call_from: RelationLocation,
    pub return_to: RelationLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadState {
    id: ThreadId,
    actor: ActorId,
    script: ScriptId,
    call_stack: Vector<MethodCall>,
    location: RelationLocation,
    state: ThreadComputationState,
    failed_for: OrdSet<Property>,
    waiting_for: OrdSet<ThreadId>,
    loop_stack: Vector<RelationLocation>,
    atomic: u32,
    operations: Vector<Arc<ProgramOperation>>,
}

impl ThreadState {
    pub fn new(
        actor: ActorId,
        script: ScriptId,
        location: RelationLocation,
        state: ThreadComputationState,
    ) -> Self {
        ThreadState {
            id: ThreadId::fresh(),
            actor,
            script,
            call_stack: Vector::new(),
            location,
            state,
            failed_for: OrdSet::new(),
            waiting_for: OrdSet::new(),
            loop_stack: Vector::new(),
            atomic: 0,
            operations: Vector::new(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn script(&self) -> ScriptId {
        self.script
    }

    pub fn location(&self) -> &RelationLocation {
        &self.location
    }

    /// The stored state; `Running` even inside atomic blocks.
    pub fn state(&self) -> ThreadComputationState {
        self.state
    }

    /// The state with `RunningAtomic` derived from the nesting counter.
    pub fn computation_state(&self) -> ThreadComputationState {
        match self.state {
            ThreadComputationState::Running if self.atomic > 0 => {
                ThreadComputationState::RunningAtomic
            }
            other => other,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ThreadComputationState::Running
    }

    pub fn call_stack(&self) -> &Vector<MethodCall> {
        &self.call_stack
    }

    pub fn failed_for(&self) -> &OrdSet<Property> {
        &self.failed_for
    }

    pub fn waiting_for(&self) -> &OrdSet<ThreadId> {
        &self.waiting_for
    }

    pub fn loop_stack(&self) -> &Vector<RelationLocation> {
        &self.loop_stack
    }

    pub fn atomic(&self) -> u32 {
        self.atomic
    }

    /// Operations the wrapped analysis runs instead of the stepped one.
    pub fn operations(&self) -> &Vector<Arc<ProgramOperation>> {
        &self.operations
    }

    pub fn with_state(&self, state: ThreadComputationState) -> Self {
        ThreadState {
            state,
            ..self.clone()
        }
    }

    pub fn with_location(&self, location: RelationLocation) -> Self {
        ThreadState {
            location,
            ..self.clone()
        }
    }

    pub fn with_call_stack(&self, call_stack: Vector<MethodCall>) -> Self {
        ThreadState {
            call_stack,
            ..self.clone()
        }
    }

    pub fn with_failed_for(&self, properties: impl IntoIterator<Item = Property>) -> Self {
        let mut failed_for = self.failed_for.clone();
        failed_for.extend(properties);
        ThreadState {
            failed_for,
            ..self.clone()
        }
    }

    pub fn with_waiting_for(&self, waiting_for: OrdSet<ThreadId>) -> Self {
        ThreadState {
            waiting_for,
            ..self.clone()
        }
    }

    pub fn with_loop_stack(&self, loop_stack: Vector<RelationLocation>) -> Self {
        ThreadState {
            loop_stack,
            ..self.clone()
        }
    }

    pub fn with_atomic(&self, atomic: u32) -> Self {
        ThreadState {
            atomic,
            ..self.clone()
        }
    }

    pub fn with_operations(&self, operations: Vector<Arc<ProgramOperation>>) -> Self {
        ThreadState {
            operations,
            ..self.clone()
        }
    }

    /// Back at `entry` of its script, runnable, with every stack cleared.
    pub fn restarted(&self, entry: RelationLocation) -> Self {
        ThreadState {
            location: entry,
            state: ThreadComputationState::Yield,
            call_stack: Vector::new(),
            waiting_for: OrdSet::new(),
            loop_stack: Vector::new(),
            atomic: 0,
            operations: Vector::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} [{}]",
            self.id,
            self.actor,
            self.location,
            self.computation_state()
        )
    }
}

/// Scheduling state of the whole program, wrapping the state of a data
/// analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAbstractState<W> {
    threads: Vector<ThreadState>,
    condition_threads: Vector<ThreadState>,
    wrapped: W,
    is_target_for: OrdSet<Property>,
    stepped_for: OrdSet<usize>,
    actor_scopes: OrdMap<Variable, ActorId>,
}

impl<W: Clone> ControlAbstractState<W> {
    pub fn new(threads: Vector<ThreadState>, wrapped: W) -> Self {
        ControlAbstractState {
            threads,
            condition_threads: Vector::new(),
            wrapped,
            is_target_for: OrdSet::new(),
            stepped_for: OrdSet::new(),
            actor_scopes: OrdMap::new(),
        }
    }

    pub fn threads(&self) -> &Vector<ThreadState> {
        &self.threads
    }

    pub fn thread(&self, index: usize) -> Option<&ThreadState> {
        self.threads.get(index)
    }

    pub fn condition_threads(&self) -> &Vector<ThreadState> {
        &self.condition_threads
    }

    pub fn wrapped(&self) -> &W {
        &self.wrapped
    }

    pub fn is_target_for(&self) -> &OrdSet<Property> {
        &self.is_target_for
    }

    pub fn is_target(&self) -> bool {
        !self.is_target_for.is_empty()
    }

    /// Indices of the threads stepped to reach this state.
    pub fn stepped_for(&self) -> &OrdSet<usize> {
        &self.stepped_for
    }

    pub fn actor_scopes(&self) -> &OrdMap<Variable, ActorId> {
        &self.actor_scopes
    }

    pub fn running_indices(&self) -> Vec<usize> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_running())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn with_thread(&self, index: usize, thread: ThreadState) -> Self {
        ControlAbstractState {
            threads: self.threads.update(index, thread),
            ..self.clone()
        }
    }

    pub fn with_condition_threads(&self, condition_threads: Vector<ThreadState>) -> Self {
        ControlAbstractState {
            condition_threads,
            ..self.clone()
        }
    }

    pub fn with_wrapped(&self, wrapped: W) -> Self {
        ControlAbstractState {
            wrapped,
            ..self.clone()
        }
    }

    pub fn with_target_for(&self, properties: impl IntoIterator<Item = Property>) -> Self {
        let mut is_target_for = self.is_target_for.clone();
        is_target_for.extend(properties);
        ControlAbstractState {
            is_target_for,
            ..self.clone()
        }
    }

    pub fn with_stepped(&self, index: usize) -> Self {
        ControlAbstractState {
            stepped_for: OrdSet::unit(index),
            ..self.clone()
        }
    }

    pub fn with_actor_scope(&self, variable: Variable, actor: ActorId) -> Self {
        ControlAbstractState {
            actor_scopes: self.actor_scopes.update(variable, actor),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(state: ThreadComputationState) -> ThreadState {
        let loc = RelationLocation::new(ActorId::new("Cat"), RelationId(1), LocationId(1));
        ThreadState::new(ActorId::new("Cat"), ScriptId(1), loc, state)
    }

    #[test]
    fn atomic_running_is_derived() {
        let t = thread(ThreadComputationState::Running);
        assert_eq!(t.computation_state(), ThreadComputationState::Running);
        let t = t.with_atomic(2);
        assert_eq!(t.computation_state(), ThreadComputationState::RunningAtomic);
        assert_eq!(t.state(), ThreadComputationState::Running);
        assert!(t.is_running());
    }

    #[test]
    fn updates_leave_the_original_untouched() {
        let original = ControlAbstractState::new(
            Vector::from(vec![thread(ThreadComputationState::Yield)]),
            (),
        );
        let running = original.threads()[0].with_state(ThreadComputationState::Running);
        let stepped = original.with_thread(0, running);
        assert!(original.running_indices().is_empty());
        assert_eq!(stepped.running_indices(), vec![0]);
    }

    #[test]
    fn restart_clears_stacks() {
        let t = thread(ThreadComputationState::Wait)
            .with_atomic(1)
            .with_waiting_for(OrdSet::unit(ThreadId(9)));
        let entry = t.location().at(LocationId(7));
        let r = t.restarted(entry.clone());
        assert_eq!(r.state(), ThreadComputationState::Yield);
        assert_eq!(r.location(), &entry);
        assert_eq!(r.atomic(), 0);
        assert!(r.waiting_for().is_empty());
        assert_eq!(r.id(), t.id());
    }
}
