//! Resolution of unqualified variables against actor and call scopes.
//!
//! Actor-level variables live in the scope `[actor]`. Every other
//! unqualified variable is local to the scope stack of the script or
//! method it occurs in. A call writes its arguments into the callee's
//! scope while evaluating them in the caller's, so targets and reads may
//! resolve against different stacks.

use thiserror::Error;

use crate::ast::{DataType, Expr, Message, Statement, Variable};
use crate::ids::ActorId;
use crate::ops::ProgramOperation;
use crate::program::Actor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("cannot resolve the actor referenced by '{variable}'")]
    UnresolvedActor { variable: String },
    #[error("unsupported actor expression '{expr}'")]
    UnsupportedActorExpr { expr: String },
}

pub type ActorResolver<'a> = &'a dyn Fn(&Variable) -> Option<ActorId>;

pub struct ScopeTransformer<'a> {
    actor: &'a Actor,
    read_scope: Vec<String>,
    write_scope: Vec<String>,
    resolve_actor: Option<ActorResolver<'a>>,
}

impl<'a> ScopeTransformer<'a> {
    /// Reads and writes both resolve against `scope`.
    pub fn new(actor: &'a Actor, scope: Vec<String>) -> Self {
        ScopeTransformer {
            actor,
            read_scope: scope.clone(),
            write_scope: scope,
            resolve_actor: None,
        }
    }

    pub fn with_write_scope(mut self, scope: Vec<String>) -> Self {
        self.write_scope = scope;
        self
    }

    /// Lookup for actor-typed variables, used by attribute accesses.
    pub fn with_actor_resolver(mut self, resolve: ActorResolver<'a>) -> Self {
        self.resolve_actor = Some(resolve);
        self
    }

    pub fn read_scope(&self) -> &[String] {
        &self.read_scope
    }

    pub fn write_scope(&self) -> &[String] {
        &self.write_scope
    }

    fn variable(&self, v: &Variable, is_target: bool) -> Variable {
        if !v.is_unqualified() {
            return v.clone();
        }
        let scope = if self.actor.declares_variable(&v.ident) {
            vec![self.actor.id.as_str().to_string()]
        } else if is_target {
            self.write_scope.clone()
        } else {
            self.read_scope.clone()
        };
        Variable::scoped(v.ident.clone(), v.ty, scope)
    }

    pub fn target(&self, v: &Variable) -> Variable {
        self.variable(v, true)
    }

    pub fn read(&self, v: &Variable) -> Variable {
        self.variable(v, false)
    }

    fn actor_of(&self, expr: &Expr) -> Result<ActorId, ScopeError> {
        match expr {
            Expr::Usher => Ok(self.actor.id.clone()),
            Expr::LocateActor(name) => match name.as_str_lit() {
                Some(name) => Ok(ActorId::new(name)),
                None => Err(ScopeError::UnsupportedActorExpr {
                    expr: expr.to_string(),
                }),
            },
            Expr::Var(v) if v.ty == DataType::Actor => {
                let scoped = self.read(v);
                self.resolve_actor
                    .and_then(|resolve| resolve(&scoped))
                    .ok_or_else(|| ScopeError::UnresolvedActor {
                        variable: scoped.qualified_name(),
                    })
            }
            _ => Err(ScopeError::UnsupportedActorExpr {
                expr: expr.to_string(),
            }),
        }
    }

    pub fn expr(&self, e: &Expr) -> Result<Expr, ScopeError> {
        e.try_rewrite(&mut |e| match e {
            Expr::Var(v) => Ok(Some(Expr::Var(self.read(v)))),
            Expr::AttributeOf {
                actor,
                attribute,
                ty,
            } => {
                let owner = self.actor_of(actor)?;
                Ok(Some(Expr::Var(Variable::scoped(
                    attribute.clone(),
                    *ty,
                    vec![owner.as_str().to_string()],
                ))))
            }
            _ => Ok(None),
        })
    }

    fn message(&self, m: &Message) -> Result<Message, ScopeError> {
        Ok(Message {
            namespace: self.expr(&m.namespace)?,
            id: self.expr(&m.id)?,
        })
    }

    pub fn statement(&self, s: &Statement) -> Result<Statement, ScopeError> {
        Ok(match s {
            Statement::Epsilon
            | Statement::BeginAtomic
            | Statement::EndAtomic
            | Statement::SignalTargetReached { .. } => s.clone(),
            Statement::Assume(e) => Statement::Assume(self.expr(e)?),
            Statement::DeclareStackVariable(v) => Statement::DeclareStackVariable(self.target(v)),
            Statement::StoreEvalResult { variable, value } => Statement::StoreEvalResult {
                variable: self.target(variable),
                value: self.expr(value)?,
            },
            Statement::Call {
                method,
                args,
                assign_result_to,
            } => Statement::Call {
                method: method.clone(),
                args: args.iter().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
                assign_result_to: assign_result_to.as_ref().map(|v| self.target(v)),
            },
            Statement::Return { result } => Statement::Return {
                result: result.as_ref().map(|v| self.read(v)),
            },
            Statement::BroadcastMessage(m) => Statement::BroadcastMessage(self.message(m)?),
            Statement::BroadcastAndWait(m) => Statement::BroadcastAndWait(self.message(m)?),
            Statement::WaitUntil(e) => Statement::WaitUntil(self.expr(e)?),
            Statement::WaitSecs(e) => Statement::WaitSecs(self.expr(e)?),
            Statement::ExpressionStatement(e) => Statement::ExpressionStatement(self.expr(e)?),
        })
    }

    /// The operation with every variable qualified; the id is kept.
    pub fn transform(&self, op: &ProgramOperation) -> Result<ProgramOperation, ScopeError> {
        Ok(op.with_statement(self.statement(&op.statement)?))
    }
}
