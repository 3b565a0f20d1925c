//! Algebra over transition relations, used to synthesize relations at
//! analysis time (condition checks, acceleration steps, call glue).
//!
//! Combinators never relabel locations: the caller is responsible for
//! passing relations with disjoint location sets.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ids::{LocationId, OperationId, RelationId};
use crate::program::ModelError;
use crate::transition::{TransitionRelation, TransitionTable};

fn add_transition(tx: &mut TransitionTable, from: LocationId, to: LocationId, op: OperationId) {
    tx.entry(from).or_default().entry(to).or_default().insert(op);
}

fn merge_tables(into: &mut TransitionTable, from: &TransitionTable) {
    for (src, targets) in from {
        for (dst, ops) in targets {
            for op in ops {
                add_transition(into, *src, *dst, *op);
            }
        }
    }
}

fn circular(location: LocationId) -> ModelError {
    ModelError::CircularCombinator { location }
}

/// A single fresh location that is both entry and exit.
pub fn epsilon() -> TransitionRelation {
    singleton(LocationId::fresh())
}

/// `loc` as both entry and exit, without transitions.
pub fn singleton(loc: LocationId) -> TransitionRelation {
    let id = RelationId::fresh();
    let one = BTreeSet::from([loc]);
    TransitionRelation::unchecked(
        id,
        id.to_string(),
        TransitionTable::new(),
        one.clone(),
        one.clone(),
        one,
    )
}

pub fn single_transition(
    from: LocationId,
    to: LocationId,
    op: OperationId,
) -> Result<TransitionRelation, ModelError> {
    TransitionRelation::builder()
        .add_entry_location(from)
        .add_exit_location(to)
        .add_transition(from, to, op)
        .build()
}

/// A straight line of fresh locations labeled with `ops`.
pub fn for_op_seq(ops: &[OperationId]) -> Result<TransitionRelation, ModelError> {
    let mut result = epsilon();
    for op in ops {
        result = concat_tr_op_goto(&result, *op, LocationId::fresh())?;
    }
    Ok(result)
}

/// Sequential composition: every exit of `tr1` gets an epsilon edge to every
/// entry of `tr2`.
pub fn concat(
    tr1: &TransitionRelation,
    tr2: &TransitionRelation,
) -> Result<TransitionRelation, ModelError> {
    let mut tx = tr1.transition_table().clone();
    merge_tables(&mut tx, tr2.transition_table());
    for exit in tr1.exit_locations() {
        for entry in tr2.entry_locations() {
            add_transition(&mut tx, *exit, *entry, OperationId::EPSILON);
        }
    }
    let locations = tr1.locations().union(tr2.locations()).copied().collect();
    TransitionRelation::from_parts(
        None,
        tx,
        locations,
        tr1.entry_locations().clone(),
        tr2.exit_locations().clone(),
    )
}

/// Append `op` from every exit of `tr` to the new location `goto`, which
/// becomes the only exit.
pub fn concat_tr_op_goto(
    tr: &TransitionRelation,
    op: OperationId,
    goto: LocationId,
) -> Result<TransitionRelation, ModelError> {
    if tr.locations().contains(&goto) {
        return Err(circular(goto));
    }
    let mut tx = tr.transition_table().clone();
    let mut locations = tr.locations().clone();
    locations.insert(goto);
    let mut exit = tr.exit_locations().clone();
    for from in tr.exit_locations() {
        add_transition(&mut tx, *from, goto, op);
        exit.remove(from);
        exit.insert(goto);
    }
    TransitionRelation::from_parts(None, tx, locations, tr.entry_locations().clone(), exit)
}

/// Prepend `op` from the new location `loc` to every entry of `tr`; `loc`
/// becomes the only entry.
pub fn concat_op_tr(
    loc: LocationId,
    op: OperationId,
    tr: &TransitionRelation,
) -> Result<TransitionRelation, ModelError> {
    if tr.locations().contains(&loc) {
        return Err(circular(loc));
    }
    let mut tx = tr.transition_table().clone();
    let mut locations = tr.locations().clone();
    locations.insert(loc);
    for to in tr.entry_locations() {
        add_transition(&mut tx, loc, *to, op);
    }
    TransitionRelation::from_parts(
        None,
        tx,
        locations,
        BTreeSet::from([loc]),
        tr.exit_locations().clone(),
    )
}

/// Two guarded branches joined at `exit`.
///
/// A fresh entry location has epsilon edges into both branches, and the
/// exits of both branches have epsilon edges into `exit`.
pub fn branching(
    then_case: &TransitionRelation,
    else_case: &TransitionRelation,
    exit: LocationId,
) -> Result<TransitionRelation, ModelError> {
    if then_case.locations().contains(&exit) || else_case.locations().contains(&exit) {
        return Err(circular(exit));
    }
    let entry = LocationId::fresh();
    let mut tx = then_case.transition_table().clone();
    merge_tables(&mut tx, else_case.transition_table());
    for branch in [then_case, else_case] {
        for to in branch.entry_locations() {
            add_transition(&mut tx, entry, *to, OperationId::EPSILON);
        }
        for from in branch.exit_locations() {
            add_transition(&mut tx, *from, exit, OperationId::EPSILON);
        }
    }
    let mut locations: BTreeSet<LocationId> = then_case
        .locations()
        .union(else_case.locations())
        .copied()
        .collect();
    locations.insert(entry);
    locations.insert(exit);
    TransitionRelation::from_parts(
        None,
        tx,
        locations,
        BTreeSet::from([entry]),
        BTreeSet::from([exit]),
    )
}

/// Relabeling with fresh locations is not supported.
pub fn relabel(tr: &TransitionRelation) -> Result<TransitionRelation, ModelError> {
    Err(ModelError::Relabel {
        relation: tr.name().to_string(),
    })
}

fn epsilon_closure(tr: &TransitionRelation, from: LocationId) -> BTreeSet<LocationId> {
    let mut closure = BTreeSet::from([from]);
    let mut stack = vec![from];
    while let Some(loc) = stack.pop() {
        for (op, to) in tr.transitions_from(loc) {
            if op == OperationId::EPSILON && closure.insert(to) {
                stack.push(to);
            }
        }
    }
    closure
}

/// An equivalent relation without epsilon transitions.
///
/// Locations that become unreachable from the entries are dropped; a
/// location is an exit if an exit is in its epsilon closure.
pub fn eliminate_epsilons(tr: &TransitionRelation) -> Result<TransitionRelation, ModelError> {
    let closures: BTreeMap<LocationId, BTreeSet<LocationId>> = tr
        .locations()
        .iter()
        .map(|loc| (*loc, epsilon_closure(tr, *loc)))
        .collect();

    let mut tx = TransitionTable::new();
    let mut exit = BTreeSet::new();
    for (loc, closure) in &closures {
        for via in closure {
            for (op, to) in tr.transitions_from(*via) {
                if op != OperationId::EPSILON {
                    add_transition(&mut tx, *loc, to, op);
                }
            }
        }
        if closure.iter().any(|c| tr.exit_locations().contains(c)) {
            exit.insert(*loc);
        }
    }

    let mut reachable: BTreeSet<LocationId> = tr.entry_locations().clone();
    let mut queue: VecDeque<LocationId> = reachable.iter().copied().collect();
    while let Some(loc) = queue.pop_front() {
        if let Some(targets) = tx.get(&loc) {
            for to in targets.keys() {
                if reachable.insert(*to) {
                    queue.push_back(*to);
                }
            }
        }
    }

    tx.retain(|from, _| reachable.contains(from));
    exit.retain(|loc| reachable.contains(loc));
    TransitionRelation::from_parts(
        Some(tr.name().to_string()),
        tx,
        reachable,
        tr.entry_locations().clone(),
        exit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_sequence_is_a_straight_line() {
        let ops = [OperationId::fresh(), OperationId::fresh()];
        let tr = for_op_seq(&ops).unwrap();
        let entry = tr.single_entry().unwrap();
        let first = tr.transitions_from(entry);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, ops[0]);
        let second = tr.transitions_from(first[0].1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, ops[1]);
        assert_eq!(tr.exit_locations(), &BTreeSet::from([second[0].1]));
        assert!(!tr.has_loops());
    }

    #[test]
    fn goto_into_existing_location_is_circular() {
        let tr = epsilon();
        let entry = tr.single_entry().unwrap();
        assert!(matches!(
            concat_tr_op_goto(&tr, OperationId::fresh(), entry),
            Err(ModelError::CircularCombinator { .. })
        ));
        assert!(matches!(
            concat_op_tr(entry, OperationId::fresh(), &tr),
            Err(ModelError::CircularCombinator { .. })
        ));
    }

    #[test]
    fn prepending_moves_the_entry() {
        let body = for_op_seq(&[OperationId::fresh()]).unwrap();
        let head = LocationId::fresh();
        let op = OperationId::fresh();
        let tr = concat_op_tr(head, op, &body).unwrap();
        assert_eq!(tr.single_entry().unwrap(), head);
        assert_eq!(
            tr.transitions_from(head),
            vec![(op, body.single_entry().unwrap())]
        );
    }

    #[test]
    fn concat_then_eliminate_yields_direct_edges() {
        let (a, b) = (OperationId::fresh(), OperationId::fresh());
        let tr = concat(&for_op_seq(&[a]).unwrap(), &for_op_seq(&[b]).unwrap()).unwrap();
        let flat = eliminate_epsilons(&tr).unwrap();

        let entry = flat.single_entry().unwrap();
        let step1 = flat.transitions_from(entry);
        assert_eq!(step1.len(), 1);
        assert_eq!(step1[0].0, a);
        let step2 = flat.transitions_from(step1[0].1);
        assert_eq!(step2.len(), 1);
        assert_eq!(step2[0].0, b);
        assert!(flat.exit_locations().contains(&step2[0].1));
        assert!(flat
            .transition_table()
            .values()
            .flat_map(|t| t.values())
            .all(|ops| !ops.contains(&OperationId::EPSILON)));
    }

    #[test]
    fn branching_joins_both_cases() {
        let (t, e) = (OperationId::fresh(), OperationId::fresh());
        let exit = LocationId::fresh();
        let tr = branching(
            &for_op_seq(&[t]).unwrap(),
            &for_op_seq(&[e]).unwrap(),
            exit,
        )
        .unwrap();
        let flat = eliminate_epsilons(&tr).unwrap();
        let entry = flat.single_entry().unwrap();
        let mut labels: Vec<OperationId> =
            flat.transitions_from(entry).into_iter().map(|(op, _)| op).collect();
        labels.sort();
        let mut expected = vec![t, e];
        expected.sort();
        assert_eq!(labels, expected);
        for (_, to) in flat.transitions_from(entry) {
            assert!(flat.exit_locations().contains(&to));
        }
    }

    #[test]
    fn relabel_is_a_modeling_gap() {
        assert!(matches!(relabel(&epsilon()), Err(ModelError::Relabel { .. })));
    }
}
