//! Control-flow intermediate representation of multi-actor scripts.
//!
//! This crate defines fresh identifiers, the closed statement and
//! expression types, program operations and their registry, transition
//! relations with their combinators, the program model (`App`), and the
//! data-location scoping pass applied before operations are interpreted.

pub mod ast;
pub mod combinators;
pub mod ids;
pub mod ops;
pub mod program;
pub mod runtime;
pub mod scoping;
pub mod transition;
