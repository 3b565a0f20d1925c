//! First-order layer for abstraction refinement.
//!
//! This crate provides solver-agnostic terms, static-single-assignment
//! index alignment for trace formulas, the narrow solver interface the
//! refiner consumes (push/pop, reference counting, satisfiability, Craig
//! interpolation), an SMT-LIB2 printer, and a reference interpolating
//! backend for bound-literal conjunctions.

pub mod backends;
pub mod solver;
pub mod sorts;
pub mod ssa;
pub mod terms;
pub mod theories;
