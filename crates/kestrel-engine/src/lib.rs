#![doc = include_str!("../README.md")]

//! Proof search of the kestrel bounded model checker.
//!
//! [`bmc::BmcAlgorithm`] unrolls a program with an [`unroller::Unroller`],
//! checks a [`pool::CandidatePool`] of candidate invariants by bounded model
//! checking and tries to prove the survivors with
//! [`induction::KInductionProver`]. Failed induction steps produce
//! counterexamples to induction that are lifted into proof obligations.

pub mod abstraction;
pub mod bmc;
pub mod candidate;
pub mod counterexample;
pub mod cti;
pub mod error;
pub mod gate;
pub mod induction;
pub mod invgen;
pub mod lifting;
pub mod obligation;
pub mod options;
pub mod pool;
pub mod property_directed;
pub mod reached;
pub mod stats;
pub mod unroller;

pub use bmc::{AlgorithmStatus, BmcAlgorithm};
pub use candidate::CandidateInvariant;
pub use error::EngineError;
pub use options::BmcOptions;
