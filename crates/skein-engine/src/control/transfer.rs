//! Transfer relation of the cooperative scheduler.
//!
//! One step runs the single running thread along one leaving edge,
//! interprets the control statements of the edge itself, delegates
//! everything else to the wrapped data analysis, wakes up threads, and
//! picks the next thread to run.

use std::collections::HashMap;
use std::sync::Arc;

use im::{OrdSet, Vector};
use skein_ir::ast::{DataType, Expr, Message, Property, Statement, Variable};
use skein_ir::combinators::{eliminate_epsilons, for_op_seq};
use skein_ir::ids::{ActorId, ScriptId, ThreadId};
use skein_ir::ops::ProgramOperation;
use skein_ir::program::{Actor, App, Concern, Event};
use skein_ir::runtime::{
    BOOTSTRAP_FINISHED_MESSAGE, GLOBAL_TIME_MICROS_VAR, MICROS, MICROS_PER_SECOND, SIGNAL_FAILURE,
    SYSTEM_MESSAGE_NAMESPACE, WAIT_SECONDS, WAIT_UNTIL_MICROS_VAR,
};
use skein_ir::scoping::ScopeTransformer;
use skein_ir::transition::TransitionRelation;
use tracing::{debug, trace, warn};

use super::state::{
    ControlAbstractState, MethodCall, RelationLocation, ThreadComputationState, ThreadState,
};
use super::wrapped::{
    transfer_along_transition_system, transfer_with_intermediate_ops, WrappedTransfer,
};
use crate::config::ControlAnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult, ArgumentError, ContractViolation};

/// How a condition-check script can be fast-forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelInfo {
    pub actor: ActorId,
    pub condition: Expr,
    /// The variable that advances on its own, e.g. the global clock.
    pub variant: Variable,
    /// Value of `variant` at which `condition` first holds.
    pub accelerate_to: Expr,
}

/// Effect of a leaving edge on the loop stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopAction {
    Entering,
    Leaving,
    None,
}

type Interpreted<W> = Vec<(ControlAbstractState<W>, bool)>;

pub struct ControlTransferRelation<'a, X: WrappedTransfer> {
    app: &'a App,
    wrapped: X,
    config: ControlAnalysisConfig,
    accel_info: HashMap<ScriptId, AccelInfo>,
    accel_relations: HashMap<ScriptId, Arc<TransitionRelation>>,
}

impl<'a, X: WrappedTransfer> ControlTransferRelation<'a, X> {
    pub fn new(app: &'a App, wrapped: X, config: ControlAnalysisConfig) -> Self {
        ControlTransferRelation {
            app,
            wrapped,
            config,
            accel_info: HashMap::new(),
            accel_relations: HashMap::new(),
        }
    }

    pub fn app(&self) -> &App {
        self.app
    }

    pub fn accel_info(&self, script: ScriptId) -> Option<&AccelInfo> {
        self.accel_info.get(&script)
    }

    /// One thread per script: bootstrap scripts runnable, monitors
    /// disabled, everything else done. The first runnable thread is
    /// scheduled.
    pub fn initial_state(
        &self,
        wrapped: X::State,
    ) -> AnalysisResult<ControlAbstractState<X::State>> {
        let mut threads = Vector::new();
        for actor in self.app.actors() {
            for script in actor.scripts() {
                let relation = self.app.relation(script.relation)?;
                let entry = relation.single_entry()?;
                let runnable = relation.has_transitions_from(entry);
                let state = match script.event {
                    Event::Bootstrap if runnable => ThreadComputationState::Yield,
                    Event::AfterStatementMonitoring => ThreadComputationState::Disabled,
                    _ => ThreadComputationState::Done,
                };
                threads.push_back(ThreadState::new(
                    actor.id.clone(),
                    script.id,
                    RelationLocation::new(actor.id.clone(), relation.id(), entry),
                    state,
                ));
            }
        }
        let state = ControlAbstractState::new(threads, wrapped);
        let last = state.threads().len().saturating_sub(1);
        let state = match self.determine_next(&state, last)? {
            Some(next) => self.set_state(&state, next, ThreadComputationState::Running),
            None => state,
        };
        self.check_schedule(&state)?;
        Ok(state)
    }

    /// Successors of `state` for one scheduling step.
    pub fn abstract_succ(
        &mut self,
        state: &ControlAbstractState<X::State>,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        if state.is_target() {
            return Ok(Vec::new());
        }
        if self.config.aggregate_atomic_transitions {
            return Err(AnalysisError::unsupported("aggregation of atomic transitions"));
        }
        let running = state.running_indices();
        let index = match running.as_slice() {
            [] => return Ok(Vec::new()),
            [index] => *index,
            _ => {
                return Err(ContractViolation::SeveralRunningThreads {
                    count: running.len(),
                }
                .into())
            }
        };
        self.abstract_succ_single_step(state, index)
    }

    fn abstract_succ_single_step(
        &mut self,
        state: &ControlAbstractState<X::State>,
        index: usize,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        let thread = self.thread(state, index)?.clone();
        let concern = self.app.actor(thread.actor())?.concern;
        let leaving = self.leaving_operations(state, &thread)?;
        if leaving.is_empty() {
            return Err(ContractViolation::StuckRunningThread { thread: thread.id() }.into());
        }

        let mut successors = Vec::new();
        for (op, succ) in leaving {
            debug!(thread = %thread, op = %op.statement, "step");
            for (interpreted, handled) in self.interprete(state, index, &op, succ)? {
                let stepped = self.thread(&interpreted, index)?.clone();
                let wrapped_succs = if handled {
                    vec![interpreted.wrapped().clone()]
                } else if stepped.operations().is_empty() {
                    transfer_with_intermediate_ops(
                        &self.wrapped,
                        interpreted.wrapped(),
                        [&op],
                        concern,
                    )?
                } else {
                    transfer_with_intermediate_ops(
                        &self.wrapped,
                        interpreted.wrapped(),
                        stepped.operations().iter().map(|o| &**o),
                        concern,
                    )?
                };
                let cleared = stepped.with_operations(Vector::new());
                for wrapped in wrapped_succs {
                    if !self.wrapped.is_feasible(&wrapped) {
                        continue;
                    }
                    let next = self.switch_to_terminated(
                        &interpreted
                            .with_thread(index, cleared.clone())
                            .with_wrapped(wrapped)
                            .with_stepped(index),
                    )?;
                    for woken in self.awake(&next, concern)? {
                        successors.push(self.schedule(&woken, index)?);
                    }
                }
            }
        }
        Ok(successors)
    }

    fn thread<'s>(
        &self,
        state: &'s ControlAbstractState<X::State>,
        index: usize,
    ) -> AnalysisResult<&'s ThreadState> {
        state
            .thread(index)
            .ok_or_else(|| ContractViolation::UnknownThread { index }.into())
    }

    /// Threads at a location without leaving operations are done, unless
    /// they failed.
    fn switch_to_terminated(
        &self,
        state: &ControlAbstractState<X::State>,
    ) -> AnalysisResult<ControlAbstractState<X::State>> {
        let mut next = state.clone();
        for (index, thread) in state.threads().iter().enumerate() {
            if matches!(
                thread.state(),
                ThreadComputationState::Failure | ThreadComputationState::Done
            ) {
                continue;
            }
            if !self.has_leaving_operations(thread)? {
                next = self.set_state(&next, index, ThreadComputationState::Done);
            }
        }
        Ok(next)
    }

    fn set_state(
        &self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        to: ThreadComputationState,
    ) -> ControlAbstractState<X::State> {
        match state.thread(index) {
            Some(thread) => state.with_thread(index, thread.with_state(to)),
            None => state.clone(),
        }
    }

    /// `[actor, relation]`, the scope unqualified locals of a location
    /// live in.
    fn scope_of(&self, location: &RelationLocation) -> AnalysisResult<Vec<String>> {
        let relation = self.app.relation(location.relation)?;
        Ok(vec![
            location.actor.as_str().to_string(),
            relation.name().to_string(),
        ])
    }

    fn has_leaving_operations(&self, thread: &ThreadState) -> AnalysisResult<bool> {
        let location = thread.location();
        Ok(self
            .app
            .relation(location.relation)?
            .has_transitions_from(location.location))
    }

    /// Leaving edges of the thread's location, with scoped operations.
    fn leaving_operations(
        &self,
        state: &ControlAbstractState<X::State>,
        thread: &ThreadState,
    ) -> AnalysisResult<Vec<(ProgramOperation, RelationLocation)>> {
        let location = thread.location();
        let relation = self.app.relation(location.relation)?;
        let actor = self.app.actor(thread.actor())?;
        let resolve = |v: &Variable| state.actor_scopes().get(v).cloned();
        let scoper =
            ScopeTransformer::new(actor, self.scope_of(location)?).with_actor_resolver(&resolve);
        relation
            .transitions_from(location.location)
            .into_iter()
            .map(|(op, to)| -> AnalysisResult<_> {
                let op = self.app.operation(op)?;
                Ok((scoper.transform(&op)?, location.at(to)))
            })
            .collect()
    }

    fn loop_action(
        &self,
        pred: &RelationLocation,
        succ: &RelationLocation,
    ) -> AnalysisResult<LoopAction> {
        if pred.relation != succ.relation {
            return Ok(LoopAction::None);
        }
        let relation = self.app.relation(pred.relation)?;
        Ok(match relation.loop_body(pred.location) {
            Some(body) if body.contains(&succ.location) => LoopAction::Entering,
            Some(_) => LoopAction::Leaving,
            None => LoopAction::None,
        })
    }

    fn interprete(
        &mut self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        op: &ProgramOperation,
        succ: RelationLocation,
    ) -> AnalysisResult<Interpreted<X::State>> {
        let thread = self.thread(state, index)?;
        let pred = thread.location().clone();
        let thread = match self.loop_action(&pred, &succ)? {
            LoopAction::Entering => {
                let mut stack = thread.loop_stack().clone();
                stack.push_back(pred.clone());
                thread.with_loop_stack(stack)
            }
            LoopAction::Leaving => thread.with_loop_stack(pop_loop(thread.loop_stack())),
            LoopAction::None => thread.clone(),
        };
        let thread = thread.with_location(succ.clone());
        let moved = state.with_thread(index, thread.clone());
        self.interprete_local(&moved, index, &thread, op, &pred, &succ)
    }

    fn interprete_local(
        &mut self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        thread: &ThreadState,
        op: &ProgramOperation,
        pred: &RelationLocation,
        succ: &RelationLocation,
    ) -> AnalysisResult<Interpreted<X::State>> {
        let actor = self.app.actor(thread.actor())?;
        match &op.statement {
            Statement::SignalTargetReached { properties } => {
                let failed = thread
                    .with_state(ThreadComputationState::Failure)
                    .with_failed_for(properties.iter().cloned());
                Ok(vec![(
                    state
                        .with_thread(index, failed)
                        .with_target_for(properties.iter().cloned()),
                    true,
                )])
            }
            Statement::BeginAtomic => Ok(vec![(
                state.with_thread(index, thread.with_atomic(thread.atomic() + 1)),
                true,
            )]),
            Statement::EndAtomic => {
                let atomic = thread
                    .atomic()
                    .checked_sub(1)
                    .ok_or(ContractViolation::UnbalancedAtomic { thread: thread.id() })?;
                Ok(vec![(state.with_thread(index, thread.with_atomic(atomic)), true)])
            }
            Statement::Call { method, args, .. } if method == WAIT_SECONDS => {
                self.wait_seconds(state, index, thread, args)
            }
            Statement::Call { method, .. } if method == SIGNAL_FAILURE => {
                Err(ArgumentError::unexpected(&op.statement).into())
            }
            Statement::Call { method, .. }
                if method == MICROS || actor.is_external_method(method) =>
            {
                Ok(vec![(state.clone(), false)])
            }
            Statement::Call { method, args, .. } => {
                self.call_method(state, index, thread, actor, method, args, pred, succ)
            }
            Statement::Return { result } => {
                self.return_from_method(state, index, thread, actor, result)
            }
            Statement::BroadcastMessage(message) => {
                Ok(vec![(self.broadcast(state, message)?.0, true)])
            }
            Statement::BroadcastAndWait(message) => {
                let (mut next, receivers) = self.broadcast(state, message)?;
                if receivers.contains(&thread.id()) {
                    return Err(AnalysisError::unsupported(format!(
                        "'{}' received by its own sender",
                        op.statement
                    )));
                }
                if !receivers.is_empty() {
                    let waiting = self
                        .thread(&next, index)?
                        .with_state(ThreadComputationState::Wait)
                        .with_waiting_for(receivers);
                    next = next.with_thread(index, waiting);
                }
                Ok(vec![(next, false)])
            }
            Statement::WaitUntil(_) | Statement::WaitSecs(_) => Err(AnalysisError::unsupported(
                format!("timing semantics of '{}'", op.statement),
            )),
            Statement::StoreEvalResult { variable, value } if variable.ty == DataType::Actor => {
                let resolved = self.resolve_actor(state, thread, value)?;
                Ok(vec![(state.with_actor_scope(variable.clone(), resolved), true)])
            }
            Statement::DeclareStackVariable(variable) if variable.ty == DataType::Actor => {
                Ok(vec![(state.clone(), true)])
            }
            Statement::Epsilon
            | Statement::Assume(_)
            | Statement::DeclareStackVariable(_)
            | Statement::StoreEvalResult { .. }
            | Statement::ExpressionStatement(_) => Ok(vec![(state.clone(), false)]),
        }
    }

    fn resolve_actor(
        &self,
        state: &ControlAbstractState<X::State>,
        thread: &ThreadState,
        value: &Expr,
    ) -> AnalysisResult<ActorId> {
        let resolved = match value {
            Expr::Var(v) => state.actor_scopes().get(v).cloned(),
            Expr::LocateActor(name) => match name.as_str_lit() {
                Some(name) => self.app.actor(&ActorId::new(name)).ok().map(|a| a.id.clone()),
                None => None,
            },
            Expr::Usher => Some(thread.actor().clone()),
            Expr::StartClone(_) => {
                return Err(AnalysisError::unsupported(format!("actor cloning in '{value}'")))
            }
            _ => {
                return Err(AnalysisError::unsupported(format!(
                    "actor-typed expression '{value}'"
                )))
            }
        };
        resolved.ok_or_else(|| {
            ArgumentError::UnresolvedActor {
                expr: value.to_string(),
            }
            .into()
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn call_method(
        &self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        thread: &ThreadState,
        actor: &Actor,
        name: &str,
        args: &[Expr],
        pred: &RelationLocation,
        succ: &RelationLocation,
    ) -> AnalysisResult<Interpreted<X::State>> {
        let method = actor.method(name)?;
        if method.parameters.len() != args.len() {
            return Err(ArgumentError::Arity {
                method: name.to_string(),
                expected: method.parameters.len(),
                actual: args.len(),
            }
            .into());
        }
        let callee = self.app.relation(method.relation)?;
        let scoper = ScopeTransformer::new(actor, self.scope_of(pred)?)
            .with_write_scope(vec![actor.id.as_str().to_string(), callee.name().to_string()]);

        let mut ops = Vector::new();
        for (param, arg) in method.parameters.iter().zip(args) {
            let target = scoper.target(param);
            ops.push_back(Arc::new(ProgramOperation::fresh(
                Statement::DeclareStackVariable(target.clone()),
            )));
            ops.push_back(Arc::new(ProgramOperation::fresh(Statement::StoreEvalResult {
                variable: target,
                value: arg.clone(),
            })));
        }
        let handled = ops.is_empty();

        let mut call_stack = thread.call_stack().clone();
        call_stack.push_back(MethodCall {
            call_from: pred.clone(),
            return_to: succ.clone(),
        });
        let caller = thread.with_call_stack(call_stack).with_operations(ops);

        Ok(callee
            .entry_locations()
            .iter()
            .map(|entry| {
                let entered = caller.with_location(RelationLocation::new(
                    actor.id.clone(),
                    callee.id(),
                    *entry,
                ));
                (state.with_thread(index, entered), handled)
            })
            .collect())
    }

    fn return_from_method(
        &self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        thread: &ThreadState,
        actor: &Actor,
        result: &Option<Variable>,
    ) -> AnalysisResult<Interpreted<X::State>> {
        let mut call_stack = thread.call_stack().clone();
        let call = call_stack
            .pop_back()
            .ok_or(ContractViolation::EmptyCallStack { thread: thread.id() })?;

        let caller = self.app.relation(call.call_from.relation)?;
        let mut call_sites = Vec::new();
        for (op, to) in caller.transitions_from(call.call_from.location) {
            if to != call.return_to.location {
                continue;
            }
            if let Statement::Call {
                assign_result_to, ..
            } = &self.app.operation(op)?.statement
            {
                call_sites.push(assign_result_to.clone());
            }
        }
        let [assign_to] = call_sites.as_slice() else {
            return Err(ContractViolation::MalformedCallSite {
                location: call.call_from.location,
            }
            .into());
        };

        let mut ops = Vector::new();
        if let (Some(assign_to), Some(result)) = (assign_to, result) {
            let scoper = ScopeTransformer::new(actor, self.scope_of(&call.call_from)?);
            ops.push_back(Arc::new(ProgramOperation::fresh(Statement::StoreEvalResult {
                variable: scoper.target(assign_to),
                value: Expr::var(result.clone()),
            })));
        }
        let handled = ops.is_empty();
        let returned = thread
            .with_call_stack(call_stack)
            .with_location(call.return_to.clone())
            .with_operations(ops);
        Ok(vec![(state.with_thread(index, returned), handled)])
    }

    /// Restart every receiver of `message`, the sender included; returns
    /// the receivers' ids.
    fn broadcast(
        &self,
        state: &ControlAbstractState<X::State>,
        message: &Message,
    ) -> AnalysisResult<(ControlAbstractState<X::State>, OrdSet<ThreadId>)> {
        message_id(message)?;
        let mut next = if is_bootstrap_finished(message) {
            self.finish_bootstrap(state)?
        } else {
            state.clone()
        };
        let mut receivers = OrdSet::new();
        for (index, thread) in state.threads().iter().enumerate() {
            if thread.state() == ThreadComputationState::Failure {
                continue;
            }
            let script = self.app.script(thread.actor(), thread.script())?;
            if !matches_message(&script.event, message)? {
                continue;
            }
            trace!(receiver = %thread, %message, "message received");
            next = next.with_thread(index, self.restart_thread(thread)?);
            receivers.insert(thread.id());
        }
        Ok((next, receivers))
    }

    fn finish_bootstrap(
        &self,
        state: &ControlAbstractState<X::State>,
    ) -> AnalysisResult<ControlAbstractState<X::State>> {
        let mut next = state.clone();
        for (index, thread) in state.threads().iter().enumerate() {
            if thread.state() != ThreadComputationState::Disabled {
                continue;
            }
            let script = self.app.script(thread.actor(), thread.script())?;
            if script.event == Event::AfterStatementMonitoring {
                next = next.with_thread(index, thread.with_state(ThreadComputationState::Done));
            }
        }
        Ok(next)
    }

    fn restart_thread(&self, thread: &ThreadState) -> AnalysisResult<ThreadState> {
        let script = self.app.script(thread.actor(), thread.script())?;
        let relation = self.app.relation(script.relation)?;
        let entry = relation.single_entry()?;
        Ok(thread.restarted(RelationLocation::new(
            thread.actor().clone(),
            relation.id(),
            entry,
        )))
    }

    /// Lower `waitSeconds(secs)`: the caller records the wake-up time and
    /// waits for a fresh thread checking `clock >= wake-up time`.
    fn wait_seconds(
        &mut self,
        state: &ControlAbstractState<X::State>,
        index: usize,
        thread: &ThreadState,
        args: &[Expr],
    ) -> AnalysisResult<Interpreted<X::State>> {
        let [seconds] = args else {
            return Err(ArgumentError::Arity {
                method: WAIT_SECONDS.to_string(),
                expected: 1,
                actual: args.len(),
            }
            .into());
        };
        let actor = thread.actor().clone();
        let wait_until = Variable::scoped(
            WAIT_UNTIL_MICROS_VAR,
            DataType::Number,
            self.scope_of(thread.location())?,
        );
        let clock = Variable::global(GLOBAL_TIME_MICROS_VAR, DataType::Number);

        let ops = Vector::from(vec![
            Arc::new(ProgramOperation::fresh(Statement::Call {
                method: MICROS.to_string(),
                args: vec![],
                assign_result_to: Some(wait_until.clone()),
            })),
            Arc::new(ProgramOperation::fresh(Statement::StoreEvalResult {
                variable: wait_until.clone(),
                value: Expr::var(wait_until.clone())
                    .plus(seconds.clone().mul(Expr::num(MICROS_PER_SECOND))),
            })),
        ]);

        let condition = Expr::var(clock.clone()).ge(Expr::var(wait_until.clone()));
        let script = self.app.condition_check_script(&actor, &condition)?;
        self.accel_info.entry(script.id).or_insert_with(|| AccelInfo {
            actor: actor.clone(),
            condition: condition.clone(),
            variant: clock,
            accelerate_to: Expr::var(wait_until),
        });

        let relation = self.app.relation(script.relation)?;
        let checker = ThreadState::new(
            actor.clone(),
            script.id,
            RelationLocation::new(actor, relation.id(), relation.single_entry()?),
            ThreadComputationState::Yield,
        );
        let mut waiting_for = thread.waiting_for().clone();
        waiting_for.insert(checker.id());
        let waiting = thread
            .with_state(ThreadComputationState::Wait)
            .with_waiting_for(waiting_for)
            .with_operations(ops);

        let mut condition_threads = state.condition_threads().clone();
        condition_threads.push_back(checker);
        Ok(vec![(
            state
                .with_thread(index, waiting)
                .with_condition_threads(condition_threads),
            false,
        )])
    }

    /// Wake-up propagation after a step taken by a thread of `concern`.
    fn awake(
        &mut self,
        state: &ControlAbstractState<X::State>,
        concern: Concern,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        let mut next = state.clone();
        if concern == Concern::Program {
            for (index, thread) in state.threads().iter().enumerate() {
                if thread.state() == ThreadComputationState::Disabled {
                    continue;
                }
                let script = self.app.script(thread.actor(), thread.script())?;
                if script.event == Event::AfterStatementMonitoring {
                    next = next.with_thread(index, self.restart_thread(thread)?);
                }
            }
        }

        let done: OrdSet<ThreadId> = next
            .threads()
            .iter()
            .filter(|t| t.state() == ThreadComputationState::Done)
            .map(|t| t.id())
            .collect();
        for (index, thread) in next.clone().threads().iter().enumerate() {
            if thread.waiting_for().is_empty() {
                continue;
            }
            let remaining = thread.waiting_for().clone().relative_complement(done.clone());
            let mut updated = thread.with_waiting_for(remaining);
            if updated.state() == ThreadComputationState::Wait && updated.waiting_for().is_empty() {
                updated = self.wake(&updated)?;
            }
            next = next.with_thread(index, updated);
        }

        self.run_state_check_threads(&next)
    }

    /// A waiting thread whose wait is over.
    fn wake(&self, thread: &ThreadState) -> AnalysisResult<ThreadState> {
        Ok(if self.has_leaving_operations(thread)? {
            thread.with_state(ThreadComputationState::Yield)
        } else {
            thread.with_state(ThreadComputationState::Done)
        })
    }

    fn run_state_check_threads(
        &mut self,
        state: &ControlAbstractState<X::State>,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        if state.condition_threads().is_empty() {
            return Ok(vec![state.clone()]);
        }
        let progressing = state.threads().iter().any(|t| {
            matches!(
                t.state(),
                ThreadComputationState::Yield | ThreadComputationState::Running
            )
        });
        if progressing {
            return self.check_condition_and_wake_up(state);
        }

        let accelerable: Vec<&ThreadState> = state
            .condition_threads()
            .iter()
            .filter(|t| self.accel_info.contains_key(&t.script()))
            .collect();
        let clock = Variable::global(GLOBAL_TIME_MICROS_VAR, DataType::Number);
        match accelerable.as_slice() {
            [checker]
                if accelerable.len() == state.condition_threads().len()
                    && self
                        .accel_info
                        .get(&checker.script())
                        .is_some_and(|info| info.variant == clock) =>
            {
                let accelerated = self.accelerate(state, checker.script())?;
                let mut successors = Vec::new();
                for s in accelerated {
                    successors.extend(self.check_condition_and_wake_up(&s)?);
                }
                Ok(successors)
            }
            _ => Err(AnalysisError::unsupported(format!(
                "acceleration of {} waiting conditions ({} accelerable)",
                state.condition_threads().len(),
                accelerable.len()
            ))),
        }
    }

    /// Jump the variant of `script`'s condition to the value where the
    /// condition holds.
    fn accelerate(
        &mut self,
        state: &ControlAbstractState<X::State>,
        script: ScriptId,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        let relation = self.acceleration_relation(script)?;
        let Some(info) = self.accel_info.get(&script) else {
            return Ok(vec![state.clone()]);
        };
        warn!(
            actor = %info.actor,
            variant = %info.variant,
            to = %info.accelerate_to,
            "accelerating wait condition"
        );
        let concern = self.app.actor(&info.actor)?.concern;
        let entry = relation.single_entry()?;
        let identity =
            |op: &ProgramOperation| -> AnalysisResult<ProgramOperation> { Ok(op.clone()) };
        Ok(transfer_along_transition_system(
            &self.wrapped,
            self.app,
            state.wrapped(),
            &relation,
            entry,
            concern,
            &identity,
        )?
        .into_iter()
        .filter(|(_, at_exit)| *at_exit)
        .map(|(wrapped, _)| state.with_wrapped(wrapped))
        .collect())
    }

    fn acceleration_relation(
        &mut self,
        script: ScriptId,
    ) -> AnalysisResult<Arc<TransitionRelation>> {
        if let Some(relation) = self.accel_relations.get(&script) {
            return Ok(Arc::clone(relation));
        }
        let info = self
            .accel_info
            .get(&script)
            .ok_or_else(|| AnalysisError::unsupported(format!("acceleration of script {script}")))?;
        let step = self.app.register_operation(Statement::StoreEvalResult {
            variable: info.variant.clone(),
            value: info.accelerate_to.clone(),
        })?;
        let relation = eliminate_epsilons(&for_op_seq(&[step.id])?)?
            .with_name(format!("accelerate_{script}"));
        let relation = self.app.register_relation(relation)?;
        self.accel_relations.insert(script, Arc::clone(&relation));
        Ok(relation)
    }

    /// Evaluate the condition threads some thread waits for and wake the
    /// waiters whose condition holds.
    fn check_condition_and_wake_up(
        &self,
        state: &ControlAbstractState<X::State>,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        let checker_ids: OrdSet<ThreadId> =
            state.condition_threads().iter().map(|t| t.id()).collect();

        let mut pending: Vec<(usize, ThreadId)> = Vec::new();
        for (index, thread) in state.threads().iter().enumerate() {
            if thread.state() != ThreadComputationState::Wait {
                continue;
            }
            let relevant = thread.waiting_for().clone().intersection(checker_ids.clone());
            match relevant.len() {
                0 => {}
                1 => {
                    if let Some(checker) = relevant.get_min() {
                        pending.push((index, *checker));
                    }
                }
                count => {
                    return Err(ContractViolation::SeveralConditionChecks {
                        thread: thread.id(),
                        count,
                    }
                    .into())
                }
            }
        }

        let mut alternatives = vec![state.clone()];
        for (waiter, checker_id) in &pending {
            let mut expanded: Vec<ControlAbstractState<X::State>> = Vec::new();
            for alternative in &alternatives {
                for next in self.check_condition(alternative, *waiter, *checker_id)? {
                    if !expanded.contains(&next) {
                        expanded.push(next);
                    }
                }
            }
            alternatives = expanded;
        }

        let waited: OrdSet<ThreadId> = pending.iter().map(|(_, c)| *c).collect();
        Ok(alternatives
            .into_iter()
            .map(|s| {
                let kept: Vector<ThreadState> = s
                    .condition_threads()
                    .iter()
                    .filter(|c| {
                        c.state() != ThreadComputationState::Done && waited.contains(&c.id())
                    })
                    .cloned()
                    .collect();
                s.with_condition_threads(kept)
            })
            .collect())
    }

    fn check_condition(
        &self,
        state: &ControlAbstractState<X::State>,
        waiter: usize,
        checker_id: ThreadId,
    ) -> AnalysisResult<Vec<ControlAbstractState<X::State>>> {
        let Some((checker_index, checker)) = state
            .condition_threads()
            .iter()
            .enumerate()
            .find(|(_, c)| c.id() == checker_id)
        else {
            return Ok(vec![state.clone()]);
        };
        let relation = self.app.relation(checker.location().relation)?;
        let actor = self.app.actor(checker.actor())?;
        let scoper = ScopeTransformer::new(actor, self.scope_of(checker.location())?);
        let scope = |op: &ProgramOperation| -> AnalysisResult<ProgramOperation> {
            Ok(scoper.transform(op)?)
        };
        let outcomes = transfer_along_transition_system(
            &self.wrapped,
            self.app,
            state.wrapped(),
            &relation,
            checker.location().location,
            actor.concern,
            &scope,
        )?;

        let mut results = Vec::new();
        for (wrapped, holds) in outcomes {
            let mut next = state.with_wrapped(wrapped);
            if holds {
                let done = checker.with_state(ThreadComputationState::Done);
                next = next.with_condition_threads(
                    next.condition_threads().update(checker_index, done),
                );
                if let Some(thread) = next.thread(waiter) {
                    let mut remaining = thread.waiting_for().clone();
                    remaining.remove(&checker_id);
                    let mut woken = thread.with_waiting_for(remaining);
                    if woken.waiting_for().is_empty() {
                        woken = self.wake(&woken)?;
                    }
                    next = next.with_thread(waiter, woken);
                }
            }
            results.push(next);
        }
        Ok(results)
    }

    /// Decide which thread runs next after `stepped` took a step.
    fn schedule(
        &self,
        state: &ControlAbstractState<X::State>,
        stepped: usize,
    ) -> AnalysisResult<ControlAbstractState<X::State>> {
        let thread = self.thread(state, stepped)?;
        let has_ops = self.has_leaving_operations(thread)?;
        if thread.is_running() && thread.atomic() > 0 && has_ops {
            self.check_schedule(state)?;
            return Ok(state.clone());
        }

        let mut next = state.clone();
        if !has_ops
            && matches!(
                thread.state(),
                ThreadComputationState::Running | ThreadComputationState::Yield
            )
        {
            next = self.set_state(&next, stepped, ThreadComputationState::Done);
        } else if thread.is_running() {
            next = self.set_state(&next, stepped, ThreadComputationState::Yield);
        }

        if let Some(chosen) = self.determine_next(&next, stepped)? {
            next = self.set_state(&next, chosen, ThreadComputationState::Running);
        }
        self.check_schedule(&next)?;
        Ok(next)
    }

    /// Round robin from the thread after `stepped`, observers first.
    ///
    /// Returns the first runnable observer thread, else the first runnable
    /// program thread, else `stepped` if it can still step.
    pub fn determine_next(
        &self,
        state: &ControlAbstractState<X::State>,
        stepped: usize,
    ) -> AnalysisResult<Option<usize>> {
        let count = state.threads().len();
        let mut first_program = None;
        for offset in 1..=count {
            let index = (stepped + offset) % count;
            let Some(thread) = state.thread(index) else {
                continue;
            };
            if thread.state() != ThreadComputationState::Yield
                || !self.has_leaving_operations(thread)?
            {
                continue;
            }
            if self.app.actor(thread.actor())?.is_observer {
                return Ok(Some(index));
            }
            first_program.get_or_insert(index);
        }
        if first_program.is_some() {
            return Ok(first_program);
        }
        match state.thread(stepped) {
            Some(thread)
                if matches!(
                    thread.state(),
                    ThreadComputationState::Running | ThreadComputationState::Yield
                ) && self.has_leaving_operations(thread)? =>
            {
                Ok(Some(stepped))
            }
            _ => Ok(None),
        }
    }

    fn check_schedule(&self, state: &ControlAbstractState<X::State>) -> AnalysisResult<()> {
        let running = state.running_indices();
        if running.len() > 1 {
            return Err(ContractViolation::SeveralRunningThreads {
                count: running.len(),
            }
            .into());
        }
        for index in running {
            let thread = self.thread(state, index)?;
            if !self.has_leaving_operations(thread)? {
                return Err(ContractViolation::StuckRunningThread { thread: thread.id() }.into());
            }
        }
        Ok(())
    }
}

/// Pop the run of entries equal to the top of the loop stack, and the
/// entry directly below that run. Stacks of at most one entry become empty.
pub fn pop_loop(stack: &Vector<RelationLocation>) -> Vector<RelationLocation> {
    if stack.len() <= 1 {
        return Vector::new();
    }
    let top = &stack[stack.len() - 1];
    let mut keep = stack.len() - 1;
    while keep > 0 && &stack[keep] == top {
        keep -= 1;
    }
    stack.take(keep)
}

/// Whether a broadcast of `message` triggers `event`. Only the message id
/// is compared; the namespace is not.
fn matches_message(event: &Event, message: &Message) -> AnalysisResult<bool> {
    let Event::MessageReceived { message: expected, .. } = event else {
        return Ok(false);
    };
    Ok(message_id(message)? == expected)
}

fn message_id(message: &Message) -> AnalysisResult<&str> {
    match (message.namespace.as_str_lit(), message.id.as_str_lit()) {
        (Some(_), Some(id)) => Ok(id),
        _ => Err(ArgumentError::NonLiteralMessage {
            message: message.to_string(),
        }
        .into()),
    }
}

fn is_bootstrap_finished(message: &Message) -> bool {
    message.namespace.as_str_lit() == Some(SYSTEM_MESSAGE_NAMESPACE)
        && message.id.as_str_lit() == Some(BOOTSTRAP_FINISHED_MESSAGE)
}

/// Properties a state is a target for, across all failed threads.
pub fn failed_properties<W: Clone>(state: &ControlAbstractState<W>) -> OrdSet<Property> {
    state
        .threads()
        .iter()
        .flat_map(|t| t.failed_for().iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_ir::ids::{LocationId, RelationId};

    fn loc(n: u64) -> RelationLocation {
        RelationLocation::new(ActorId::new("Cat"), RelationId(1), LocationId(n))
    }

    #[test]
    fn pop_loop_also_drops_the_entry_below_the_run_of_equal_heads() {
        let stack = |ids: &[u64]| ids.iter().copied().map(loc).collect::<Vector<_>>();
        assert_eq!(pop_loop(&stack(&[1, 2, 3])), stack(&[1]));
        assert_eq!(pop_loop(&stack(&[5, 1, 2, 2])), stack(&[5]));
        assert!(pop_loop(&stack(&[1, 2])).is_empty());
        assert!(pop_loop(&stack(&[1, 2, 2, 2])).is_empty());
        assert!(pop_loop(&stack(&[2, 2])).is_empty());
        assert!(pop_loop(&stack(&[1])).is_empty());
        assert!(pop_loop(&Vector::new()).is_empty());
    }

    #[test]
    fn messages_match_on_id_only() {
        let event = Event::MessageReceived {
            message: "go".into(),
            namespace: "app".into(),
        };
        let other_namespace = Message {
            namespace: Expr::str("elsewhere"),
            id: Expr::str("go"),
        };
        assert!(matches_message(&event, &other_namespace).unwrap());
        assert!(!matches_message(&event, &Message::app("stop")).unwrap());
        assert!(!matches_message(&Event::Startup, &Message::app("go")).unwrap());
    }

    #[test]
    fn computed_message_ids_are_rejected() {
        let event = Event::MessageReceived {
            message: "go".into(),
            namespace: "app".into(),
        };
        let computed = Message {
            namespace: Expr::str("app"),
            id: Expr::var(Variable::global("m", DataType::String)),
        };
        assert!(matches!(
            matches_message(&event, &computed),
            Err(AnalysisError::Argument(ArgumentError::NonLiteralMessage { .. }))
        ));
    }

    #[test]
    fn bootstrap_message_needs_the_system_namespace() {
        assert!(is_bootstrap_finished(&Message::bootstrap_finished()));
        assert!(!is_bootstrap_finished(&Message::app(BOOTSTRAP_FINISHED_MESSAGE)));
    }
}
