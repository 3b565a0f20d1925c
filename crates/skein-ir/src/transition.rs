//! Transition relations: labeled multigraphs over control locations.
//!
//! A relation is built once through [`TransitionRelationBuilder`] and is
//! immutable afterwards. The backwards view and the loop structure are
//! computed on first use and cached.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::OnceLock;

use crate::ids::{LocationId, OperationId, RelationId};
use crate::program::ModelError;

/// `from -> to -> {op}`.
pub type TransitionTable = BTreeMap<LocationId, BTreeMap<LocationId, BTreeSet<OperationId>>>;

#[derive(Debug, Default)]
pub struct TransitionRelationBuilder {
    name: Option<String>,
    transitions: TransitionTable,
    locations: BTreeSet<LocationId>,
    entry: BTreeSet<LocationId>,
    exit: BTreeSet<LocationId>,
}

impl TransitionRelationBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_location(mut self, loc: LocationId) -> Self {
        self.locations.insert(loc);
        self
    }

    pub fn add_entry_location(mut self, loc: LocationId) -> Self {
        self.entry.insert(loc);
        self.locations.insert(loc);
        self
    }

    pub fn add_exit_location(mut self, loc: LocationId) -> Self {
        self.exit.insert(loc);
        self.locations.insert(loc);
        self
    }

    /// Both endpoints must be registered before [`build`](Self::build).
    pub fn add_transition(mut self, from: LocationId, to: LocationId, op: OperationId) -> Self {
        self.transitions
            .entry(from)
            .or_default()
            .entry(to)
            .or_default()
            .insert(op);
        self
    }

    pub fn build(self) -> Result<TransitionRelation, ModelError> {
        TransitionRelation::from_parts(
            self.name,
            self.transitions,
            self.locations,
            self.entry,
            self.exit,
        )
    }
}

/// Natural loops, keyed by loop head.
#[derive(Debug, Clone, Default)]
struct LoopInfo {
    bodies: BTreeMap<LocationId, BTreeSet<LocationId>>,
}

#[derive(Debug, Clone)]
pub struct TransitionRelation {
    id: RelationId,
    name: String,
    transitions: TransitionTable,
    locations: BTreeSet<LocationId>,
    entry: BTreeSet<LocationId>,
    exit: BTreeSet<LocationId>,
    backwards: OnceLock<Box<TransitionRelation>>,
    loops: OnceLock<LoopInfo>,
}

impl TransitionRelation {
    pub fn builder() -> TransitionRelationBuilder {
        TransitionRelationBuilder::default()
    }

    /// Validates that every location mentioned is registered.
    pub(crate) fn from_parts(
        name: Option<String>,
        transitions: TransitionTable,
        locations: BTreeSet<LocationId>,
        entry: BTreeSet<LocationId>,
        exit: BTreeSet<LocationId>,
    ) -> Result<Self, ModelError> {
        let id = RelationId::fresh();
        let name = name.unwrap_or_else(|| id.to_string());

        let mentioned = transitions
            .iter()
            .flat_map(|(from, targets)| std::iter::once(from).chain(targets.keys()))
            .chain(entry.iter())
            .chain(exit.iter());
        for loc in mentioned {
            if !locations.contains(loc) {
                return Err(ModelError::UnregisteredLocation {
                    relation: name,
                    location: *loc,
                });
            }
        }

        Ok(Self::unchecked(id, name, transitions, locations, entry, exit))
    }

    pub(crate) fn unchecked(
        id: RelationId,
        name: String,
        transitions: TransitionTable,
        locations: BTreeSet<LocationId>,
        entry: BTreeSet<LocationId>,
        exit: BTreeSet<LocationId>,
    ) -> Self {
        TransitionRelation {
            id,
            name,
            transitions,
            locations,
            entry,
            exit,
            backwards: OnceLock::new(),
            loops: OnceLock::new(),
        }
    }

    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same relation under a different name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn transition_table(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn locations(&self) -> &BTreeSet<LocationId> {
        &self.locations
    }

    pub fn entry_locations(&self) -> &BTreeSet<LocationId> {
        &self.entry
    }

    pub fn exit_locations(&self) -> &BTreeSet<LocationId> {
        &self.exit
    }

    /// The entry location of a relation that has exactly one.
    pub fn single_entry(&self) -> Result<LocationId, ModelError> {
        let mut it = self.entry.iter();
        match (it.next(), it.next()) {
            (Some(loc), None) => Ok(*loc),
            _ => Err(ModelError::EntryLocationCount {
                relation: self.name.clone(),
                count: self.entry.len(),
            }),
        }
    }

    pub fn transitions_from(&self, from: LocationId) -> Vec<(OperationId, LocationId)> {
        let Some(targets) = self.transitions.get(&from) else {
            return Vec::new();
        };
        targets
            .iter()
            .flat_map(|(to, ops)| ops.iter().map(move |op| (*op, *to)))
            .collect()
    }

    pub fn has_transitions_from(&self, from: LocationId) -> bool {
        self.transitions
            .get(&from)
            .is_some_and(|targets| targets.values().any(|ops| !ops.is_empty()))
    }

    /// Transitions reaching `to`, as `(op, source)` pairs.
    pub fn transitions_to(&self, to: LocationId) -> Vec<(OperationId, LocationId)> {
        self.backwards().transitions_from(to)
    }

    /// The relation with every edge reversed; entry and exit swap roles.
    pub fn backwards(&self) -> &TransitionRelation {
        self.backwards.get_or_init(|| {
            let mut reversed = TransitionTable::new();
            for (from, targets) in &self.transitions {
                for (to, ops) in targets {
                    reversed
                        .entry(*to)
                        .or_default()
                        .entry(*from)
                        .or_default()
                        .extend(ops.iter().copied());
                }
            }
            Box::new(TransitionRelation {
                id: self.id,
                name: format!("{}~", self.name),
                transitions: reversed,
                locations: self.locations.clone(),
                entry: self.exit.clone(),
                exit: self.entry.clone(),
                backwards: OnceLock::new(),
                loops: OnceLock::new(),
            })
        })
    }

    fn loop_info(&self) -> &LoopInfo {
        self.loops.get_or_init(|| compute_loops(self))
    }

    pub fn has_loops(&self) -> bool {
        !self.loop_info().bodies.is_empty()
    }

    pub fn is_loop_head(&self, loc: LocationId) -> bool {
        self.loop_info().bodies.contains_key(&loc)
    }

    /// Body of the loop headed by `head`, head included.
    pub fn loop_body(&self, head: LocationId) -> Option<&BTreeSet<LocationId>> {
        self.loop_info().bodies.get(&head)
    }

    /// Head of the smallest loop whose body contains `loc`.
    pub fn innermost_loop_of(&self, loc: LocationId) -> Option<LocationId> {
        self.loop_info()
            .bodies
            .iter()
            .filter(|(_, body)| body.contains(&loc))
            .min_by_key(|(_, body)| body.len())
            .map(|(head, _)| *head)
    }
}

impl fmt::Display for TransitionRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for from in &self.locations {
            for (op, to) in self.transitions_from(*from) {
                if !first {
                    writeln!(f)?;
                }
                first = false;
                write!(f, "{from} {op} {to}")?;
            }
        }
        Ok(())
    }
}

fn reachable_from_entries(tr: &TransitionRelation) -> BTreeSet<LocationId> {
    let mut seen: BTreeSet<LocationId> = tr.entry.iter().copied().collect();
    let mut queue: VecDeque<LocationId> = tr.entry.iter().copied().collect();
    while let Some(loc) = queue.pop_front() {
        for (_, to) in tr.transitions_from(loc) {
            if seen.insert(to) {
                queue.push_back(to);
            }
        }
    }
    seen
}

/// Natural loops from back edges `u -> h` where `h` dominates `u`.
fn compute_loops(tr: &TransitionRelation) -> LoopInfo {
    let reachable = reachable_from_entries(tr);
    let preds = |loc: LocationId| -> Vec<LocationId> {
        tr.transitions_to(loc)
            .into_iter()
            .map(|(_, from)| from)
            .filter(|from| reachable.contains(from))
            .collect()
    };

    // Entries are dominated by a virtual root only.
    let mut dom: BTreeMap<LocationId, BTreeSet<LocationId>> = reachable
        .iter()
        .map(|loc| {
            let init = if tr.entry.contains(loc) {
                BTreeSet::from([*loc])
            } else {
                reachable.clone()
            };
            (*loc, init)
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for loc in reachable.iter().filter(|l| !tr.entry.contains(*l)) {
            let mut new: Option<BTreeSet<LocationId>> = None;
            for p in preds(*loc) {
                let pd = &dom[&p];
                new = Some(match new {
                    None => pd.clone(),
                    Some(acc) => acc.intersection(pd).copied().collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            new.insert(*loc);
            if dom.get(loc) != Some(&new) {
                dom.insert(*loc, new);
                changed = true;
            }
        }
    }

    let mut info = LoopInfo::default();
    for from in &reachable {
        for (_, head) in tr.transitions_from(*from) {
            if !dom[from].contains(&head) {
                continue;
            }
            let body = info.bodies.entry(head).or_insert_with(|| BTreeSet::from([head]));
            let mut stack = vec![*from];
            while let Some(n) = stack.pop() {
                if body.insert(n) {
                    stack.extend(preds(n));
                }
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locs(n: usize) -> Vec<LocationId> {
        (0..n).map(|_| LocationId::fresh()).collect()
    }

    #[test]
    fn build_rejects_unregistered_locations() {
        let l = locs(2);
        let err = TransitionRelation::builder()
            .add_entry_location(l[0])
            .add_transition(l[0], l[1], OperationId::EPSILON)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::UnregisteredLocation { location, .. } if location == l[1]
        ));
    }

    #[test]
    fn backwards_view_reverses_edges() {
        let l = locs(3);
        let (a, b) = (OperationId::fresh(), OperationId::fresh());
        let tr = TransitionRelation::builder()
            .add_entry_location(l[0])
            .add_location(l[1])
            .add_exit_location(l[2])
            .add_transition(l[0], l[1], a)
            .add_transition(l[1], l[2], b)
            .build()
            .unwrap();
        assert_eq!(tr.transitions_to(l[2]), vec![(b, l[1])]);
        assert_eq!(tr.transitions_to(l[0]), vec![]);
        assert_eq!(tr.backwards().entry_locations(), tr.exit_locations());
    }

    #[test]
    fn while_loop_is_detected() {
        // l0 -> l1 (head) -> l2 -> l1, l1 -> l3
        let l = locs(4);
        let op = OperationId::fresh;
        let tr = TransitionRelation::builder()
            .add_entry_location(l[0])
            .add_location(l[1])
            .add_location(l[2])
            .add_exit_location(l[3])
            .add_transition(l[0], l[1], op())
            .add_transition(l[1], l[2], op())
            .add_transition(l[2], l[1], op())
            .add_transition(l[1], l[3], op())
            .build()
            .unwrap();
        assert!(tr.is_loop_head(l[1]));
        assert!(!tr.is_loop_head(l[0]));
        assert_eq!(tr.loop_body(l[1]), Some(&BTreeSet::from([l[1], l[2]])));
        assert_eq!(tr.innermost_loop_of(l[2]), Some(l[1]));
        assert_eq!(tr.innermost_loop_of(l[3]), None);
    }

    #[test]
    fn nested_loops_resolve_to_innermost() {
        // outer head l1, inner head l2 with body {l2, l3}
        let l = locs(5);
        let op = OperationId::fresh;
        let tr = TransitionRelation::builder()
            .add_entry_location(l[0])
            .add_location(l[1])
            .add_location(l[2])
            .add_location(l[3])
            .add_exit_location(l[4])
            .add_transition(l[0], l[1], op())
            .add_transition(l[1], l[2], op())
            .add_transition(l[2], l[3], op())
            .add_transition(l[3], l[2], op())
            .add_transition(l[2], l[1], op())
            .add_transition(l[1], l[4], op())
            .build()
            .unwrap();
        assert_eq!(tr.innermost_loop_of(l[3]), Some(l[2]));
        assert_eq!(tr.innermost_loop_of(l[1]), Some(l[1]));
        assert!(tr.loop_body(l[1]).is_some_and(|b| b.contains(&l[3])));
    }

    #[test]
    fn display_lists_one_transition_per_line() {
        let l = [LocationId(1), LocationId(2)];
        let tr = TransitionRelation::builder()
            .add_entry_location(l[0])
            .add_exit_location(l[1])
            .add_transition(l[0], l[1], OperationId(5))
            .build()
            .unwrap();
        assert_eq!(tr.to_string(), "L1 op5 L2");
    }
}
