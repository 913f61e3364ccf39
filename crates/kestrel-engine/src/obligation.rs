//! Proof obligations derived from failed induction attempts.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::candidate::{CandidateInvariant, SymbolicCandidate};

/// A sub-goal whose truth would rule out an observed counterexample to
/// induction of `cause`.
///
/// Obligations order by depth first, so shallow obligations are processed
/// before deep ones. Equality and hashing ignore the depth, which is a
/// function of the cause anyway.
#[derive(Debug, Clone)]
pub struct Obligation {
    cause: CandidateInvariant,
    blocking_clause: SymbolicCandidate,
    weakenings: Vec<SymbolicCandidate>,
    depth: usize,
}

impl Obligation {
    pub fn new(
        cause: CandidateInvariant,
        blocking_clause: SymbolicCandidate,
        weakenings: Vec<SymbolicCandidate>,
    ) -> Self {
        let depth = match &cause {
            CandidateInvariant::Obligation(parent) => parent.depth + 1,
            _ => 0,
        };
        Self {
            cause,
            blocking_clause,
            weakenings,
            depth,
        }
    }

    pub fn cause(&self) -> &CandidateInvariant {
        &self.cause
    }

    pub fn blocking_clause(&self) -> &SymbolicCandidate {
        &self.blocking_clause
    }

    /// Successively less restrictive alternatives to the blocking clause.
    pub fn weakenings(&self) -> &[SymbolicCandidate] {
        &self.weakenings
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Walk the causal chain down to the first non-obligation candidate.
    pub fn root_cause(&self) -> &CandidateInvariant {
        let mut current = &self.cause;
        while let CandidateInvariant::Obligation(parent) = current {
            current = &parent.cause;
        }
        current
    }

    /// The same obligation with its blocking clause replaced by the first
    /// weakening; `None` once the weakenings are used up.
    pub fn weaken(&self) -> Option<Obligation> {
        let (next, rest) = self.weakenings.split_first()?;
        Some(Obligation {
            cause: self.cause.clone(),
            blocking_clause: next.clone(),
            weakenings: rest.to_vec(),
            depth: self.depth,
        })
    }
}

impl PartialEq for Obligation {
    fn eq(&self, other: &Self) -> bool {
        self.cause == other.cause
            && self.blocking_clause == other.blocking_clause
            && self.weakenings == other.weakenings
    }
}

impl Eq for Obligation {}

impl Hash for Obligation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cause.hash(state);
        self.blocking_clause.hash(state);
        self.weakenings.hash(state);
    }
}

impl Ord for Obligation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.depth
            .cmp(&other.depth)
            .then_with(|| self.cause.cmp(&other.cause))
            .then_with(|| self.blocking_clause.cmp(&other.blocking_clause))
            .then_with(|| self.weakenings.cmp(&other.weakenings))
    }
}

impl PartialOrd for Obligation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "obligation(depth {}, {} weakenings) {}",
            self.depth,
            self.weakenings.len(),
            self.blocking_clause
        )
    }
}
