#![doc = include_str!("../README.md")]

//! Solver-facing layer of the kestrel proof engine.
//!
//! This crate provides the solver-agnostic term language, SSA indexing of
//! program variables, the raw incremental session traits, and the
//! [`prover::ResilientProver`] that keeps one logical assertion stack alive
//! across backend failures. A Z3 backend is available behind the `z3`
//! feature.

pub mod backends;
pub mod prover;
pub mod shutdown;
pub mod solver;
pub mod sorts;
pub mod ssa;
pub mod terms;
