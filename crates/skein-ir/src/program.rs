//! The program model: actors, their scripts and methods, and the registry
//! of transition relations and operations they refer to.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::ast::{Expr, Statement, Variable};
use crate::ids::{ActorId, LocationId, OperationId, RelationId, ScriptId};
use crate::ops::{OperationRegistry, ProgramOperation};
use crate::transition::TransitionRelation;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown actor '{0}'")]
    UnknownActor(ActorId),
    #[error("actor '{0}' is declared twice")]
    DuplicateActor(ActorId),
    #[error("actor '{actor}' has no script {script}")]
    UnknownScript { actor: ActorId, script: ScriptId },
    #[error("actor '{actor}' has no method '{method}'")]
    UnknownMethod { actor: ActorId, method: String },
    #[error("actor '{actor}' declares method '{method}' more than once")]
    AmbiguousMethod { actor: ActorId, method: String },
    #[error("unknown transition relation {0}")]
    UnknownRelation(RelationId),
    #[error("unknown operation {0}")]
    UnknownOperation(OperationId),
    #[error("relation '{relation}' has {count} entry locations, expected exactly one")]
    EntryLocationCount { relation: String, count: usize },
    #[error("relation '{relation}' mentions unregistered location {location}")]
    UnregisteredLocation {
        relation: String,
        location: LocationId,
    },
    #[error("relabeling relation '{relation}' with fresh locations is not supported")]
    Relabel { relation: String },
    #[error("location {location} already belongs to the relation; cycles are not supported")]
    CircularCombinator { location: LocationId },
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Partition of actors into the program under test and its specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Concern {
    Program,
    Specification,
}

impl Concern {
    /// Concerns in ascending priority.
    pub const ALL: [Concern; 2] = [Concern::Program, Concern::Specification];

    pub fn highest_priority() -> Concern {
        Concern::Specification
    }

    pub fn priority(self) -> u8 {
        match self {
            Concern::Program => 0,
            Concern::Specification => 1,
        }
    }
}

/// What triggers a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    Bootstrap,
    AfterBootstrap,
    Startup,
    MessageReceived { message: String, namespace: String },
    /// Runs after every statement of the program, once bootstrap finished.
    AfterStatementMonitoring,
    /// Synthesized scripts evaluating a wait condition.
    ConditionCheck,
    Never,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Bootstrap => f.write_str("bootstrap"),
            Event::AfterBootstrap => f.write_str("after bootstrap"),
            Event::Startup => f.write_str("startup"),
            Event::MessageReceived { message, namespace } => {
                write!(f, "message {namespace}/{message} received")
            }
            Event::AfterStatementMonitoring => f.write_str("after statement"),
            Event::ConditionCheck => f.write_str("condition check"),
            Event::Never => f.write_str("never"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub id: ScriptId,
    pub event: Event,
    pub relation: RelationId,
}

impl Script {
    pub fn new(event: Event, relation: RelationId) -> Self {
        Script {
            id: ScriptId::fresh(),
            event,
            relation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub parameters: Vec<Variable>,
    /// Variable holding the return value, if the method returns one.
    pub result: Option<Variable>,
    pub relation: RelationId,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ActorId,
    pub concern: Concern,
    pub is_observer: bool,
    scripts: IndexMap<ScriptId, Script>,
    methods: IndexMap<String, Method>,
    external_methods: BTreeSet<String>,
    variables: BTreeSet<String>,
}

impl Actor {
    pub fn new(id: ActorId, concern: Concern) -> Self {
        Actor {
            id,
            concern,
            is_observer: concern == Concern::Specification,
            scripts: IndexMap::new(),
            methods: IndexMap::new(),
            external_methods: BTreeSet::new(),
            variables: BTreeSet::new(),
        }
    }

    pub fn add_script(&mut self, script: Script) -> ScriptId {
        let id = script.id;
        self.scripts.insert(id, script);
        id
    }

    pub fn add_method(&mut self, method: Method) -> Result<(), ModelError> {
        if self.methods.contains_key(&method.name) {
            return Err(ModelError::AmbiguousMethod {
                actor: self.id.clone(),
                method: method.name,
            });
        }
        self.methods.insert(method.name.clone(), method);
        Ok(())
    }

    /// Declare a method implemented by the runtime.
    pub fn add_external_method(&mut self, name: impl Into<String>) {
        self.external_methods.insert(name.into());
    }

    /// Declare an actor-level variable.
    pub fn add_variable(&mut self, name: impl Into<String>) {
        self.variables.insert(name.into());
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.scripts.values()
    }

    pub fn script(&self, id: ScriptId) -> Option<&Script> {
        self.scripts.get(&id)
    }

    pub fn method(&self, name: &str) -> Result<&Method, ModelError> {
        self.methods.get(name).ok_or_else(|| ModelError::UnknownMethod {
            actor: self.id.clone(),
            method: name.to_string(),
        })
    }

    pub fn is_external_method(&self, name: &str) -> bool {
        self.external_methods.contains(name)
    }

    pub fn declares_variable(&self, name: &str) -> bool {
        self.variables.contains(name)
    }
}

/// A program: its actors and every relation and operation they use.
///
/// Relations, operations and condition-check scripts sit behind locks so
/// that analyses can register synthesized ones while the model is shared.
#[derive(Debug)]
pub struct App {
    name: String,
    actors: IndexMap<ActorId, Actor>,
    relations: RwLock<HashMap<RelationId, Arc<TransitionRelation>>>,
    operations: OperationRegistry,
    condition_scripts: RwLock<HashMap<(ActorId, Expr), Script>>,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        App {
            name: name.into(),
            actors: IndexMap::new(),
            relations: RwLock::new(HashMap::new()),
            operations: OperationRegistry::new(),
            condition_scripts: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_actor(&mut self, actor: Actor) -> Result<(), ModelError> {
        if self.actors.contains_key(&actor.id) {
            return Err(ModelError::DuplicateActor(actor.id));
        }
        self.actors.insert(actor.id.clone(), actor);
        Ok(())
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn actor(&self, id: &ActorId) -> Result<&Actor, ModelError> {
        self.actors
            .get(id)
            .ok_or_else(|| ModelError::UnknownActor(id.clone()))
    }

    pub fn register_operation(
        &self,
        statement: Statement,
    ) -> Result<Arc<ProgramOperation>, ModelError> {
        self.operations.register(statement)
    }

    pub fn operation(&self, id: OperationId) -> Result<Arc<ProgramOperation>, ModelError> {
        self.operations.resolve(id)
    }

    pub fn register_relation(
        &self,
        relation: TransitionRelation,
    ) -> Result<Arc<TransitionRelation>, ModelError> {
        let relation = Arc::new(relation);
        debug!(
            relation = %relation.id(),
            name = relation.name(),
            "registering transition relation"
        );
        self.relations
            .write()
            .map_err(|_| ModelError::Poisoned("relation registry"))?
            .insert(relation.id(), Arc::clone(&relation));
        Ok(relation)
    }

    pub fn relation(&self, id: RelationId) -> Result<Arc<TransitionRelation>, ModelError> {
        self.relations
            .read()
            .map_err(|_| ModelError::Poisoned("relation registry"))?
            .get(&id)
            .cloned()
            .ok_or(ModelError::UnknownRelation(id))
    }

    /// A script of `actor`, including synthesized condition-check scripts.
    pub fn script(&self, actor: &ActorId, id: ScriptId) -> Result<Script, ModelError> {
        if let Some(script) = self.actor(actor)?.script(id) {
            return Ok(script.clone());
        }
        let synthesized = self
            .condition_scripts
            .read()
            .map_err(|_| ModelError::Poisoned("condition scripts"))?;
        synthesized
            .iter()
            .find(|((owner, _), script)| owner == actor && script.id == id)
            .map(|(_, script)| script.clone())
            .ok_or_else(|| ModelError::UnknownScript {
                actor: actor.clone(),
                script: id,
            })
    }

    /// The script evaluating `condition` on behalf of `actor`.
    ///
    /// Its relation is `entry -[assume c]-> exit` and
    /// `entry -[assume !c]-> reject`; reaching the exit means the condition
    /// holds. Scripts are created once per actor and condition.
    pub fn condition_check_script(
        &self,
        actor: &ActorId,
        condition: &Expr,
    ) -> Result<Script, ModelError> {
        self.actor(actor)?;
        let mut scripts = self
            .condition_scripts
            .write()
            .map_err(|_| ModelError::Poisoned("condition scripts"))?;
        let key = (actor.clone(), condition.clone());
        if let Some(script) = scripts.get(&key) {
            return Ok(script.clone());
        }

        let holds = self.register_operation(Statement::Assume(condition.clone()))?;
        let fails = self.register_operation(Statement::Assume(condition.clone().not()))?;
        let (entry, exit, reject) = (LocationId::fresh(), LocationId::fresh(), LocationId::fresh());
        let relation = TransitionRelation::builder()
            .add_entry_location(entry)
            .add_exit_location(exit)
            .add_location(reject)
            .add_transition(entry, exit, holds.id)
            .add_transition(entry, reject, fails.id)
            .build()?;
        let relation = self.register_relation(relation)?;

        let script = Script::new(Event::ConditionCheck, relation.id());
        debug!(%actor, %condition, script = %script.id, "synthesized condition check");
        scripts.insert(key, script.clone());
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DataType;

    fn app_with_actor(name: &str) -> App {
        let mut app = App::new("test");
        app.add_actor(Actor::new(ActorId::new(name), Concern::Program))
            .unwrap();
        app
    }

    #[test]
    fn duplicate_actors_are_rejected() {
        let mut app = app_with_actor("Cat");
        let err = app
            .add_actor(Actor::new(ActorId::new("Cat"), Concern::Program))
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicateActor(ActorId::new("Cat")));
    }

    #[test]
    fn specification_actors_are_observers() {
        assert!(Actor::new(ActorId::new("Spec"), Concern::Specification).is_observer);
        assert!(!Actor::new(ActorId::new("Cat"), Concern::Program).is_observer);
        assert_eq!(Concern::highest_priority(), Concern::Specification);
    }

    #[test]
    fn methods_must_be_unique() {
        let mut actor = Actor::new(ActorId::new("Cat"), Concern::Program);
        let method = Method {
            name: "jump".into(),
            parameters: vec![],
            result: None,
            relation: RelationId(1),
        };
        actor.add_method(method.clone()).unwrap();
        assert!(matches!(
            actor.add_method(method),
            Err(ModelError::AmbiguousMethod { .. })
        ));
        assert!(matches!(
            actor.method("walk"),
            Err(ModelError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn condition_scripts_are_interned() {
        let app = app_with_actor("Cat");
        let cat = ActorId::new("Cat");
        let cond = Expr::var(Variable::global("t", DataType::Number)).ge(Expr::num(3));
        let first = app.condition_check_script(&cat, &cond).unwrap();
        let second = app.condition_check_script(&cat, &cond).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.event, Event::ConditionCheck);
        assert_eq!(app.script(&cat, first.id).unwrap(), first);

        let relation = app.relation(first.relation).unwrap();
        let entry = relation.single_entry().unwrap();
        let branches = relation.transitions_from(entry);
        assert_eq!(branches.len(), 2);
        let exits: Vec<bool> = branches
            .iter()
            .map(|(_, to)| relation.exit_locations().contains(to))
            .collect();
        assert_eq!(exits.iter().filter(|e| **e).count(), 1);
    }

    #[test]
    fn unknown_scripts_are_reported() {
        let app = app_with_actor("Cat");
        assert!(matches!(
            app.script(&ActorId::new("Cat"), ScriptId(u64::MAX)),
            Err(ModelError::UnknownScript { .. })
        ));
    }
}
