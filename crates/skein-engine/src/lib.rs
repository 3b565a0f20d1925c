//! Analysis core for counterexample-guided abstraction refinement.
//!
//! This crate provides the predicate precision lattice, the abstract
//! reachability graph with its reached and frontier sets, the abstraction
//! refiner (trace feasibility by interpolation, precision refinement,
//! restart), and the control transfer relation scheduling the actor
//! scripts of an [`skein_ir::program::App`] cooperatively.

pub mod abstraction;
pub mod config;
pub mod control;
pub mod error;
pub mod precision;
pub mod refiner;

pub use error::{AnalysisError, AnalysisResult};
