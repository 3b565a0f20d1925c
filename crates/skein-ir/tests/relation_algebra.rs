//! Property tests for the transition-relation combinators.

use std::collections::BTreeSet;

use proptest::prelude::*;
use skein_ir::ast::{DataType, Expr, Statement, Variable};
use skein_ir::combinators::{branching, concat, eliminate_epsilons, for_op_seq};
use skein_ir::ids::{ActorId, LocationId, OperationId};
use skein_ir::program::{Actor, App, Concern, Event, Script};
use skein_ir::transition::TransitionRelation;

/// Every label sequence from an entry to an exit, assuming no loops.
fn words(tr: &TransitionRelation) -> BTreeSet<Vec<OperationId>> {
    fn walk(
        tr: &TransitionRelation,
        at: LocationId,
        prefix: &mut Vec<OperationId>,
        out: &mut BTreeSet<Vec<OperationId>>,
    ) {
        if tr.exit_locations().contains(&at) {
            out.insert(prefix.clone());
        }
        for (op, to) in tr.transitions_from(at) {
            let eps = op == OperationId::EPSILON;
            if !eps {
                prefix.push(op);
            }
            walk(tr, to, prefix, out);
            if !eps {
                prefix.pop();
            }
        }
    }
    let mut out = BTreeSet::new();
    for entry in tr.entry_locations() {
        walk(tr, *entry, &mut Vec::new(), &mut out);
    }
    out
}

fn fresh_ops(n: usize) -> Vec<OperationId> {
    (0..n).map(|_| OperationId::fresh()).collect()
}

proptest! {
    #[test]
    fn concatenation_concatenates_words(a in 0..5usize, b in 0..5usize) {
        let (left, right) = (fresh_ops(a), fresh_ops(b));
        let tr = concat(&for_op_seq(&left).unwrap(), &for_op_seq(&right).unwrap()).unwrap();
        let expected: Vec<OperationId> = left.iter().chain(right.iter()).copied().collect();
        prop_assert_eq!(words(&tr), BTreeSet::from([expected]));
    }

    #[test]
    fn epsilon_elimination_preserves_words(a in 0..4usize, b in 0..4usize, c in 0..4usize) {
        let (then_ops, else_ops, tail_ops) = (fresh_ops(a), fresh_ops(b), fresh_ops(c));
        let diamond = branching(
            &for_op_seq(&then_ops).unwrap(),
            &for_op_seq(&else_ops).unwrap(),
            LocationId::fresh(),
        )
        .unwrap();
        let tr = concat(&diamond, &for_op_seq(&tail_ops).unwrap()).unwrap();
        let flat = eliminate_epsilons(&tr).unwrap();

        prop_assert_eq!(words(&flat), words(&tr));
        for (_, targets) in flat.transition_table() {
            for ops in targets.values() {
                prop_assert!(!ops.contains(&OperationId::EPSILON));
            }
        }
        prop_assert!(!flat.has_loops());
    }
}

#[test]
fn app_resolves_scripts_and_relations() {
    let mut app = App::new("pong");
    let step = app
        .register_operation(Statement::StoreEvalResult {
            variable: Variable::new("score", DataType::Number),
            value: Expr::num(1),
        })
        .unwrap();
    let relation = app
        .register_relation(for_op_seq(&[step.id]).unwrap().with_name("main"))
        .unwrap();

    let mut ball = Actor::new(ActorId::new("Ball"), Concern::Program);
    let script = ball.add_script(Script::new(Event::Bootstrap, relation.id()));
    app.add_actor(ball).unwrap();

    let resolved = app.script(&ActorId::new("Ball"), script).unwrap();
    let tr = app.relation(resolved.relation).unwrap();
    assert_eq!(tr.name(), "main");
    let entry = tr.single_entry().unwrap();
    let (op, _) = tr.transitions_from(entry)[0];
    assert_eq!(app.operation(op).unwrap().statement, step.statement);
}
