#![allow(dead_code)]

use skein_engine::config::ControlAnalysisConfig;
use skein_engine::control::explicit::{ExplicitState, ExplicitValueTransfer, Value};
use skein_engine::control::{ControlAbstractState, ControlTransferRelation};
use skein_ir::ast::{DataType, Expr, Statement, Variable};
use skein_ir::combinators::for_op_seq;
use skein_ir::ids::{ActorId, RelationId};
use skein_ir::program::{Actor, App, Concern, Event, Script};
use skein_ir::transition::TransitionRelation;
use tracing_subscriber::EnvFilter;

pub type State = ControlAbstractState<ExplicitState>;

/// Route analysis logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Register `statements` as a straight-line relation.
pub fn straight_line(app: &App, statements: Vec<Statement>) -> RelationId {
    let ops: Vec<_> = statements
        .into_iter()
        .map(|s| app.register_operation(s).unwrap().id)
        .collect();
    app.register_relation(for_op_seq(&ops).unwrap()).unwrap().id()
}

pub fn register(app: &App, relation: TransitionRelation) -> RelationId {
    app.register_relation(relation).unwrap().id()
}

/// An actor owning `variables`, with one script per `(event, relation)`.
pub fn actor(
    name: &str,
    concern: Concern,
    variables: &[&str],
    scripts: Vec<(Event, RelationId)>,
) -> Actor {
    let mut actor = Actor::new(ActorId::new(name), concern);
    for v in variables {
        actor.add_variable(*v);
    }
    for (event, relation) in scripts {
        actor.add_script(Script::new(event, relation));
    }
    actor
}

pub fn num(name: &str) -> Variable {
    Variable::new(name, DataType::Number)
}

pub fn store(name: &str, value: Expr) -> Statement {
    Statement::StoreEvalResult {
        variable: num(name),
        value,
    }
}

pub fn incr(name: &str) -> Statement {
    store(name, Expr::var(num(name)).plus(Expr::num(1)))
}

pub fn transfer(app: &App) -> ControlTransferRelation<'_, ExplicitValueTransfer> {
    ControlTransferRelation::new(app, ExplicitValueTransfer, ControlAnalysisConfig::default())
}

pub fn int_of(state: &State, name: &str) -> Option<i64> {
    match state.wrapped().get(name) {
        Some(Value::Int(n)) => Some(*n),
        _ => None,
    }
}

/// Follow a deterministic program until no thread can run.
///
/// Returns every visited state, the initial one first.
pub fn run_to_completion(
    transfer: &mut ControlTransferRelation<'_, ExplicitValueTransfer>,
    initial: State,
    max_steps: usize,
) -> Vec<State> {
    let mut trace = vec![initial];
    for _ in 0..max_steps {
        let current = trace.last().unwrap();
        let mut successors = transfer.abstract_succ(current).unwrap();
        match successors.len() {
            0 => return trace,
            1 => trace.push(successors.remove(0)),
            n => panic!("expected a deterministic step, got {n} successors"),
        }
    }
    panic!("program did not terminate within {max_steps} steps")
}

/// Index of the thread stepped to reach each state after the first.
pub fn stepped_sequence(trace: &[State]) -> Vec<usize> {
    trace[1..]
        .iter()
        .map(|s| {
            let stepped: Vec<usize> = s.stepped_for().iter().copied().collect();
            assert_eq!(stepped.len(), 1);
            stepped[0]
        })
        .collect()
}
