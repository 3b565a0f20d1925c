use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ast::Statement;
use crate::ids::OperationId;
use crate::program::ModelError;

/// A statement with identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramOperation {
    pub id: OperationId,
    pub statement: Statement,
}

impl ProgramOperation {
    /// A new operation under a fresh id, not registered anywhere.
    pub fn fresh(statement: Statement) -> Self {
        ProgramOperation {
            id: OperationId::fresh(),
            statement,
        }
    }

    pub fn epsilon() -> Self {
        ProgramOperation {
            id: OperationId::EPSILON,
            statement: Statement::Epsilon,
        }
    }

    pub fn is_epsilon(&self) -> bool {
        self.id == OperationId::EPSILON
    }

    /// Same identity, different statement.
    pub fn with_statement(&self, statement: Statement) -> Self {
        ProgramOperation {
            id: self.id,
            statement,
        }
    }
}

/// Operations referenced from transition relations, by id.
#[derive(Debug)]
pub struct OperationRegistry {
    operations: RwLock<HashMap<OperationId, Arc<ProgramOperation>>>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        let mut operations = HashMap::new();
        operations.insert(OperationId::EPSILON, Arc::new(ProgramOperation::epsilon()));
        OperationRegistry {
            operations: RwLock::new(operations),
        }
    }

    /// Register `statement` under a fresh id.
    pub fn register(&self, statement: Statement) -> Result<Arc<ProgramOperation>, ModelError> {
        let op = Arc::new(ProgramOperation::fresh(statement));
        self.operations
            .write()
            .map_err(|_| ModelError::Poisoned("operation registry"))?
            .insert(op.id, Arc::clone(&op));
        Ok(op)
    }

    pub fn resolve(&self, id: OperationId) -> Result<Arc<ProgramOperation>, ModelError> {
        self.operations
            .read()
            .map_err(|_| ModelError::Poisoned("operation registry"))?
            .get(&id)
            .cloned()
            .ok_or(ModelError::UnknownOperation(id))
    }

    pub fn len(&self) -> usize {
        self.operations.read().map(|ops| ops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn epsilon_always_resolves() {
        let registry = OperationRegistry::new();
        let eps = registry.resolve(OperationId::EPSILON).unwrap();
        assert!(eps.is_epsilon());
        assert_eq!(eps.statement, Statement::Epsilon);
    }

    #[test]
    fn registered_operations_resolve_by_id() {
        let registry = OperationRegistry::new();
        let op = registry
            .register(Statement::Assume(Expr::BoolLit(true)))
            .unwrap();
        assert_eq!(registry.resolve(op.id).unwrap(), op);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let registry = OperationRegistry::new();
        assert!(matches!(
            registry.resolve(OperationId(u64::MAX)),
            Err(ModelError::UnknownOperation(_))
        ));
    }
}
