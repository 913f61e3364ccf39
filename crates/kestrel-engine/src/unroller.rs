//! The transition-system side of the engine.

use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::reached::{LocationId, ReachedSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrollStatus {
    /// False when the unrolling over-approximated or skipped behavior, so an
    /// empty frontier does not prove anything.
    pub sound: bool,
}

impl UnrollStatus {
    pub const SOUND: UnrollStatus = UnrollStatus { sound: true };
    pub const UNSOUND: UnrollStatus = UnrollStatus { sound: false };
}

/// Unrolls a program into a reached set of path-encoded states.
///
/// Loop-head states carry an iteration count starting at 1. With bound `b`
/// every loop-head state with iteration `<= b` is expanded; loop-head states
/// with iteration `b + 1` are created but marked `bound_stopped`. Calling
/// `unroll` again with a larger bound resumes from the stopped states.
pub trait Unroller {
    /// A reached set holding only the initial abstraction state.
    fn initial_reached(&self) -> ReachedSet;

    fn unroll(&mut self, reached: &mut ReachedSet, bound: usize) -> Result<UnrollStatus, EngineError>;

    /// Locations used to count loop iterations.
    fn loop_heads(&self) -> BTreeSet<LocationId>;

    /// Whether `variable` (unindexed) is a nondeterministic input.
    fn is_input(&self, _variable: &str) -> bool {
        false
    }
}
