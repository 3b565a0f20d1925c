//! Concrete-value data analysis, used to run the scheduler end to end.

use std::fmt;

use im::OrdMap;
use skein_ir::ast::{DataType, Expr, Statement, Variable};
use skein_ir::ops::ProgramOperation;
use skein_ir::program::Concern;
use skein_ir::runtime::{GLOBAL_TIME_MICROS_VAR, MICROS};
use tracing::trace;

use super::wrapped::WrappedTransfer;
use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Value of an undefined or freshly declared location.
    pub fn default_for(ty: DataType) -> Option<Value> {
        match ty {
            DataType::Number => Some(Value::Int(0)),
            DataType::Boolean => Some(Value::Bool(false)),
            DataType::String => Some(Value::Str(String::new())),
            DataType::Actor => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Variable store keyed by qualified name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExplicitState {
    store: OrdMap<String, Value>,
}

impl ExplicitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        ExplicitState {
            store: self.store.update(name.into(), value),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.store.get(name)
    }

    /// The global clock; zero until first written.
    pub fn global_time(&self) -> i64 {
        match self.store.get(GLOBAL_TIME_MICROS_VAR) {
            Some(Value::Int(t)) => *t,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitValueTransfer;

fn ill_typed(expr: &Expr) -> AnalysisError {
    AnalysisError::unsupported(format!("ill-typed expression '{expr}'"))
}

impl ExplicitValueTransfer {
    pub fn eval(&self, state: &ExplicitState, expr: &Expr) -> AnalysisResult<Value> {
        Ok(match expr {
            Expr::NumLit(n) => Value::Int(*n),
            Expr::BoolLit(b) => Value::Bool(*b),
            Expr::StrLit(s) => Value::Str(s.clone()),
            Expr::Var(v) => self.read(state, v)?,
            Expr::Plus(l, r) => self.arith(state, expr, l, r, i64::checked_add)?,
            Expr::Minus(l, r) => self.arith(state, expr, l, r, i64::checked_sub)?,
            Expr::Mul(l, r) => self.arith(state, expr, l, r, i64::checked_mul)?,
            Expr::Eq(l, r) => Value::Bool(self.eval(state, l)? == self.eval(state, r)?),
            Expr::Lt(l, r) => Value::Bool(self.int(state, l)? < self.int(state, r)?),
            Expr::Le(l, r) => Value::Bool(self.int(state, l)? <= self.int(state, r)?),
            Expr::Gt(l, r) => Value::Bool(self.int(state, l)? > self.int(state, r)?),
            Expr::Ge(l, r) => Value::Bool(self.int(state, l)? >= self.int(state, r)?),
            Expr::And(l, r) => Value::Bool(self.boolean(state, l)? && self.boolean(state, r)?),
            Expr::Or(l, r) => Value::Bool(self.boolean(state, l)? || self.boolean(state, r)?),
            Expr::Not(inner) => Value::Bool(!self.boolean(state, inner)?),
            Expr::AttributeOf { .. }
            | Expr::LocateActor(_)
            | Expr::StartClone(_)
            | Expr::Usher => {
                return Err(AnalysisError::unsupported(format!(
                    "actor expression '{expr}' in value analysis"
                )))
            }
        })
    }

    fn int(&self, state: &ExplicitState, e: &Expr) -> AnalysisResult<i64> {
        match self.eval(state, e)? {
            Value::Int(n) => Ok(n),
            _ => Err(ill_typed(e)),
        }
    }

    fn boolean(&self, state: &ExplicitState, e: &Expr) -> AnalysisResult<bool> {
        match self.eval(state, e)? {
            Value::Bool(b) => Ok(b),
            _ => Err(ill_typed(e)),
        }
    }

    fn arith(
        &self,
        state: &ExplicitState,
        expr: &Expr,
        l: &Expr,
        r: &Expr,
        op: fn(i64, i64) -> Option<i64>,
    ) -> AnalysisResult<Value> {
        op(self.int(state, l)?, self.int(state, r)?)
            .map(Value::Int)
            .ok_or_else(|| AnalysisError::unsupported(format!("arithmetic overflow in '{expr}'")))
    }

    fn read(&self, state: &ExplicitState, v: &Variable) -> AnalysisResult<Value> {
        if let Some(value) = state.get(&v.qualified_name()) {
            return Ok(value.clone());
        }
        Value::default_for(v.ty).ok_or_else(|| {
            AnalysisError::unsupported(format!("actor-typed variable '{v}' in value analysis"))
        })
    }

    fn write(&self, state: &ExplicitState, v: &Variable, value: Value) -> ExplicitState {
        state.with(v.qualified_name(), value)
    }
}

impl WrappedTransfer for ExplicitValueTransfer {
    type State = ExplicitState;

    fn abstract_succ_for(
        &self,
        state: &ExplicitState,
        op: &ProgramOperation,
        _concern: Concern,
    ) -> AnalysisResult<Vec<ExplicitState>> {
        trace!(op = %op.statement, "explicit transfer");
        match &op.statement {
            Statement::Epsilon
            | Statement::BeginAtomic
            | Statement::EndAtomic
            | Statement::SignalTargetReached { .. }
            | Statement::BroadcastMessage(_)
            | Statement::BroadcastAndWait(_)
            | Statement::Return { .. } => Ok(vec![state.clone()]),
            Statement::Assume(cond) => match self.eval(state, cond)? {
                Value::Bool(true) => Ok(vec![state.clone()]),
                Value::Bool(false) => Ok(vec![]),
                _ => Err(ill_typed(cond)),
            },
            Statement::DeclareStackVariable(v) => Ok(vec![match Value::default_for(v.ty) {
                Some(value) => self.write(state, v, value),
                None => state.clone(),
            }]),
            Statement::StoreEvalResult { variable, value } => {
                let value = self.eval(state, value)?;
                Ok(vec![self.write(state, variable, value)])
            }
            Statement::ExpressionStatement(e) => {
                self.eval(state, e)?;
                Ok(vec![state.clone()])
            }
            Statement::Call {
                method,
                args,
                assign_result_to,
            } if method == MICROS && args.is_empty() => Ok(vec![match assign_result_to {
                Some(target) => self.write(state, target, Value::Int(state.global_time())),
                None => state.clone(),
            }]),
            Statement::Call { method, .. } => Err(AnalysisError::unsupported(format!(
                "call to '{method}' in value analysis"
            ))),
            Statement::WaitUntil(_) | Statement::WaitSecs(_) => Err(AnalysisError::unsupported(
                format!("'{}' in value analysis", op.statement),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(name: &str) -> Variable {
        Variable::scoped(name, DataType::Number, vec!["Cat".into()])
    }

    fn run(state: &ExplicitState, statement: Statement) -> Vec<ExplicitState> {
        ExplicitValueTransfer
            .abstract_succ_for(state, &ProgramOperation::fresh(statement), Concern::Program)
            .unwrap()
    }

    #[test]
    fn assume_filters_states() {
        let state = ExplicitState::new().with("Cat::x", Value::Int(3));
        let cond = Expr::var(num("x")).gt(Expr::num(2));
        assert_eq!(run(&state, Statement::Assume(cond.clone())).len(), 1);
        assert!(run(&state, Statement::Assume(cond.not())).is_empty());
    }

    #[test]
    fn stores_evaluate_against_the_old_state() {
        let state = ExplicitState::new().with("Cat::x", Value::Int(3));
        let next = run(
            &state,
            Statement::StoreEvalResult {
                variable: num("x"),
                value: Expr::var(num("x")).mul(Expr::num(2)),
            },
        );
        assert_eq!(next[0].get("Cat::x"), Some(&Value::Int(6)));
    }

    #[test]
    fn micros_reads_the_global_clock() {
        let state = ExplicitState::new().with(GLOBAL_TIME_MICROS_VAR, Value::Int(42));
        let next = run(
            &state,
            Statement::Call {
                method: MICROS.into(),
                args: vec![],
                assign_result_to: Some(num("t")),
            },
        );
        assert_eq!(next[0].get("Cat::t"), Some(&Value::Int(42)));
    }

    #[test]
    fn undefined_numbers_read_as_zero() {
        let value = ExplicitValueTransfer
            .eval(&ExplicitState::new(), &Expr::var(num("y")).plus(Expr::num(1)))
            .unwrap();
        assert_eq!(value, Value::Int(1));
    }

    #[test]
    fn overflow_is_refused() {
        let big = Expr::num(i64::MAX).plus(Expr::num(1));
        assert!(matches!(
            ExplicitValueTransfer.eval(&ExplicitState::new(), &big),
            Err(AnalysisError::Unsupported { .. })
        ));
    }
}
