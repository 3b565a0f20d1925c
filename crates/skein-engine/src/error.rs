//! Error taxonomy of the analysis core.
//!
//! Every error is fatal to the current analysis run. The variants separate
//! constructs the analysis refuses to model from inconsistencies that point
//! at a bug in the caller or the program model.

use skein_ir::ast::Statement;
use skein_ir::ids::{LocationId, ThreadId};
use skein_ir::program::ModelError;
use skein_ir::scoping::ScopeError;
use skein_smt::ssa::TermError;
use thiserror::Error;

use crate::abstraction::StateId;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A construct the analysis does not model. Never approximated.
    #[error("unsupported: {construct}")]
    Unsupported { construct: String },
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
    #[error("invalid argument: {0}")]
    Argument(#[from] ArgumentError),
    #[error("solver error: {0}")]
    Solver(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to write diagnostics: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        AnalysisError::Unsupported {
            construct: construct.into(),
        }
    }

    pub fn solver(err: impl std::fmt::Display) -> Self {
        AnalysisError::Solver(err.to_string())
    }
}

impl From<TermError> for AnalysisError {
    fn from(err: TermError) -> Self {
        AnalysisError::Solver(err.to_string())
    }
}

impl From<ScopeError> for AnalysisError {
    fn from(err: ScopeError) -> Self {
        AnalysisError::Argument(ArgumentError::Scope(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("no interpolation solution is cached; refinement must follow an infeasible check")]
    MissingInterpolationSolution,
    #[error("cached interpolation solution belongs to {cached}, not {requested}")]
    MismatchedTarget { cached: StateId, requested: StateId },
    #[error("infeasible trace to {target} produced no interpolants")]
    NoInterpolants { target: StateId },
    #[error("{count} threads are running at once")]
    SeveralRunningThreads { count: usize },
    #[error("running thread {thread} has no leaving operations")]
    StuckRunningThread { thread: ThreadId },
    #[error("end of atomic block without a matching begin in thread {thread}")]
    UnbalancedAtomic { thread: ThreadId },
    #[error("return in thread {thread} with an empty call stack")]
    EmptyCallStack { thread: ThreadId },
    #[error("call site at {location} is not a single call operation")]
    MalformedCallSite { location: LocationId },
    #[error("thread {thread} waits for {count} condition checks at once")]
    SeveralConditionChecks { thread: ThreadId, count: usize },
    #[error("state {0} is not part of the accessibility relation")]
    UnknownState(StateId),
    #[error("no thread at index {index}")]
    UnknownThread { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("'{method}' expects {expected} arguments, got {actual}")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("cannot resolve actor from '{expr}'")]
    UnresolvedActor { expr: String },
    #[error("message parts must be string literals, got '{message}'")]
    NonLiteralMessage { message: String },
    #[error("'{statement}' cannot be interpreted here")]
    UnexpectedStatement { statement: String },
    #[error(transparent)]
    Scope(ScopeError),
}

impl ArgumentError {
    pub fn unexpected(statement: &Statement) -> Self {
        ArgumentError::UnexpectedStatement {
            statement: statement.to_string(),
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
