use std::collections::BTreeSet;
use std::fmt;

use crate::runtime::{
    BOOTSTRAP_FINISHED_MESSAGE, DEFAULT_MESSAGE_NAMESPACE, SYSTEM_MESSAGE_NAMESPACE,
};

/// Type of a data location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Number,
    Boolean,
    String,
    /// Reference to an actor (resolved concretely, never symbolically).
    Actor,
}

/// Where a variable lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    /// Not yet scoped; resolved against the enclosing actor and script.
    Unqualified,
    /// Shared by all actors.
    Global,
    /// Qualified by a scope stack, outermost first.
    Scoped(Vec<String>),
}

/// A typed data location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    pub ident: String,
    pub ty: DataType,
    pub qualifier: Qualifier,
}

impl Variable {
    pub fn new(ident: impl Into<String>, ty: DataType) -> Self {
        Variable {
            ident: ident.into(),
            ty,
            qualifier: Qualifier::Unqualified,
        }
    }

    pub fn global(ident: impl Into<String>, ty: DataType) -> Self {
        Variable {
            ident: ident.into(),
            ty,
            qualifier: Qualifier::Global,
        }
    }

    pub fn scoped(ident: impl Into<String>, ty: DataType, scope: Vec<String>) -> Self {
        Variable {
            ident: ident.into(),
            ty,
            qualifier: Qualifier::Scoped(scope),
        }
    }

    pub fn is_unqualified(&self) -> bool {
        matches!(self.qualifier, Qualifier::Unqualified)
    }

    /// Name of the location, e.g. `Sprite1::main::x`.
    pub fn qualified_name(&self) -> String {
        match &self.qualifier {
            Qualifier::Unqualified | Qualifier::Global => self.ident.clone(),
            Qualifier::Scoped(scope) => {
                let mut name = scope.join("::");
                name.push_str("::");
                name.push_str(&self.ident);
                name
            }
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Expressions of the intermediate language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    NumLit(i64),
    BoolLit(bool),
    StrLit(String),
    Var(Variable),

    Plus(Box<Expr>, Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),

    /// Attribute of the actor an actor-typed expression refers to.
    AttributeOf {
        actor: Box<Expr>,
        attribute: String,
        ty: DataType,
    },
    /// The actor with the given name.
    LocateActor(Box<Expr>),
    /// A fresh clone of the given actor.
    StartClone(Box<Expr>),
    /// The actor running the current script.
    Usher,
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn num(n: i64) -> Self {
        Expr::NumLit(n)
    }

    pub fn str(s: impl Into<String>) -> Self {
        Expr::StrLit(s.into())
    }

    pub fn var(v: Variable) -> Self {
        Expr::Var(v)
    }

    pub fn plus(self, other: Expr) -> Self {
        Expr::Plus(Box::new(self), Box::new(other))
    }

    pub fn minus(self, other: Expr) -> Self {
        Expr::Minus(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: Expr) -> Self {
        Expr::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: Expr) -> Self {
        Expr::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// The literal text, if this is a string literal.
    pub fn as_str_lit(&self) -> Option<&str> {
        match self {
            Expr::StrLit(s) => Some(s),
            _ => None,
        }
    }

    /// Rebuild the expression bottom-up, giving `f` every variable.
    pub fn try_map_variables<E>(
        &self,
        f: &mut dyn FnMut(&Variable) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        self.try_rewrite(&mut |e| match e {
            Expr::Var(v) => f(v).map(Some),
            _ => Ok(None),
        })
    }

    /// Pre-order rewrite: where `f` returns a replacement the subtree is
    /// not visited further, otherwise the children are rewritten.
    pub fn try_rewrite<E>(
        &self,
        f: &mut dyn FnMut(&Expr) -> Result<Option<Expr>, E>,
    ) -> Result<Expr, E> {
        if let Some(replacement) = f(self)? {
            return Ok(replacement);
        }

        fn pair<E>(
            l: &Expr,
            r: &Expr,
            f: &mut dyn FnMut(&Expr) -> Result<Option<Expr>, E>,
        ) -> Result<(Box<Expr>, Box<Expr>), E> {
            Ok((Box::new(l.try_rewrite(f)?), Box::new(r.try_rewrite(f)?)))
        }

        Ok(match self {
            Expr::NumLit(_) | Expr::BoolLit(_) | Expr::StrLit(_) | Expr::Var(_) | Expr::Usher => {
                self.clone()
            }
            Expr::Plus(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Plus(l, r)
            }
            Expr::Minus(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Minus(l, r)
            }
            Expr::Mul(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Mul(l, r)
            }
            Expr::Eq(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Eq(l, r)
            }
            Expr::Lt(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Lt(l, r)
            }
            Expr::Le(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Le(l, r)
            }
            Expr::Gt(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Gt(l, r)
            }
            Expr::Ge(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Ge(l, r)
            }
            Expr::And(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::And(l, r)
            }
            Expr::Or(l, r) => {
                let (l, r) = pair(l, r, f)?;
                Expr::Or(l, r)
            }
            Expr::Not(inner) => Expr::Not(Box::new(inner.try_rewrite(f)?)),
            Expr::AttributeOf {
                actor,
                attribute,
                ty,
            } => Expr::AttributeOf {
                actor: Box::new(actor.try_rewrite(f)?),
                attribute: attribute.clone(),
                ty: *ty,
            },
            Expr::LocateActor(name) => Expr::LocateActor(Box::new(name.try_rewrite(f)?)),
            Expr::StartClone(of) => Expr::StartClone(Box::new(of.try_rewrite(f)?)),
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NumLit(n) => write!(f, "{n}"),
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::StrLit(s) => write!(f, "{s:?}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Plus(l, r) => write!(f, "({l} + {r})"),
            Expr::Minus(l, r) => write!(f, "({l} - {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
            Expr::Eq(l, r) => write!(f, "({l} = {r})"),
            Expr::Lt(l, r) => write!(f, "({l} < {r})"),
            Expr::Le(l, r) => write!(f, "({l} <= {r})"),
            Expr::Gt(l, r) => write!(f, "({l} > {r})"),
            Expr::Ge(l, r) => write!(f, "({l} >= {r})"),
            Expr::And(l, r) => write!(f, "({l} and {r})"),
            Expr::Or(l, r) => write!(f, "({l} or {r})"),
            Expr::Not(inner) => write!(f, "(not {inner})"),
            Expr::AttributeOf {
                actor, attribute, ..
            } => write!(f, "attribute {attribute} of {actor}"),
            Expr::LocateActor(name) => write!(f, "locate actor {name}"),
            Expr::StartClone(of) => write!(f, "start clone of {of}"),
            Expr::Usher => f.write_str("usher"),
        }
    }
}

/// A message sent by a broadcast statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Message {
    pub namespace: Expr,
    pub id: Expr,
}

impl Message {
    /// A message in the default application namespace.
    pub fn app(id: impl Into<String>) -> Self {
        Message {
            namespace: Expr::str(DEFAULT_MESSAGE_NAMESPACE),
            id: Expr::str(id),
        }
    }

    pub fn bootstrap_finished() -> Self {
        Message {
            namespace: Expr::str(SYSTEM_MESSAGE_NAMESPACE),
            id: Expr::str(BOOTSTRAP_FINISHED_MESSAGE),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// A monitored property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Property {
    pub name: String,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        Property { name: name.into() }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Statements labeling the transitions of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Epsilon,
    Assume(Expr),
    DeclareStackVariable(Variable),
    StoreEvalResult {
        variable: Variable,
        value: Expr,
    },
    Call {
        method: String,
        args: Vec<Expr>,
        assign_result_to: Option<Variable>,
    },
    Return {
        result: Option<Variable>,
    },
    BeginAtomic,
    EndAtomic,
    SignalTargetReached {
        properties: BTreeSet<Property>,
    },
    BroadcastMessage(Message),
    BroadcastAndWait(Message),
    WaitUntil(Expr),
    WaitSecs(Expr),
    ExpressionStatement(Expr),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Epsilon => f.write_str("ε"),
            Statement::Assume(e) => write!(f, "assume {e}"),
            Statement::DeclareStackVariable(v) => write!(f, "declare {v}"),
            Statement::StoreEvalResult { variable, value } => write!(f, "{variable} := {value}"),
            Statement::Call {
                method,
                args,
                assign_result_to,
            } => {
                if let Some(target) = assign_result_to {
                    write!(f, "{target} := ")?;
                }
                write!(f, "{method}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Statement::Return { result: Some(v) } => write!(f, "return {v}"),
            Statement::Return { result: None } => f.write_str("return"),
            Statement::BeginAtomic => f.write_str("begin atomic"),
            Statement::EndAtomic => f.write_str("end atomic"),
            Statement::SignalTargetReached { properties } => {
                let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                write!(f, "signal target reached {{{}}}", names.join(", "))
            }
            Statement::BroadcastMessage(m) => write!(f, "broadcast {m}"),
            Statement::BroadcastAndWait(m) => write!(f, "broadcast {m} and wait"),
            Statement::WaitUntil(e) => write!(f, "wait until {e}"),
            Statement::WaitSecs(e) => write!(f, "wait {e} seconds"),
            Statement::ExpressionStatement(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_join_the_scope_stack() {
        let local = Variable::scoped("x", DataType::Number, vec!["Cat".into(), "main".into()]);
        assert_eq!(local.qualified_name(), "Cat::main::x");
        assert_eq!(Variable::global("t", DataType::Number).qualified_name(), "t");
    }

    #[test]
    fn map_variables_visits_every_variable() {
        let x = Variable::new("x", DataType::Number);
        let expr = Expr::var(x.clone()).plus(Expr::num(1)).lt(Expr::var(x));
        let mut seen = 0;
        let mapped = expr
            .try_map_variables(&mut |v| {
                seen += 1;
                Ok::<_, ()>(Expr::var(Variable::global(v.ident.clone(), v.ty)))
            })
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(mapped.to_string(), "((x + 1) < x)");
    }

    #[test]
    fn statements_render_readably() {
        let call = Statement::Call {
            method: "waitSeconds".into(),
            args: vec![Expr::num(2)],
            assign_result_to: None,
        };
        assert_eq!(call.to_string(), "waitSeconds(2)");
        assert_eq!(
            Statement::BroadcastMessage(Message::app("go")).to_string(),
            "broadcast \"app\"/\"go\""
        );
    }
}
