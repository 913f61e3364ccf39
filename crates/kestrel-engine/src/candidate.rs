//! Candidate invariants: the things a run tries to prove.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use kestrel_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};

use crate::obligation::Obligation;
use crate::reached::{AbstractState, LocationId, ReachedSet};

/// Which states at a candidate's locations the candidate constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateFilter {
    Any,
    LoopHead,
}

/// A location-independent formula bound to a set of locations.
///
/// The formula is over unindexed variable names and is instantiated with
/// each state's SSA map. The location set never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolicCandidate {
    formula: SmtTerm,
    locations: BTreeSet<LocationId>,
    filter: StateFilter,
}

impl SymbolicCandidate {
    pub fn new(formula: SmtTerm, locations: impl IntoIterator<Item = LocationId>) -> Self {
        Self {
            formula,
            locations: locations.into_iter().collect(),
            filter: StateFilter::Any,
        }
    }

    pub fn at_loop_heads(formula: SmtTerm, locations: impl IntoIterator<Item = LocationId>) -> Self {
        Self {
            filter: StateFilter::LoopHead,
            ..Self::new(formula, locations)
        }
    }

    pub fn formula(&self) -> &SmtTerm {
        &self.formula
    }

    pub fn locations(&self) -> &BTreeSet<LocationId> {
        &self.locations
    }

    pub fn filter(&self) -> StateFilter {
        self.filter
    }

    pub fn with_formula(&self, formula: SmtTerm) -> Self {
        Self {
            formula,
            locations: self.locations.clone(),
            filter: self.filter,
        }
    }

    pub fn applies_to(&self, state: &AbstractState) -> bool {
        self.locations.contains(&state.location)
            && match self.filter {
                StateFilter::Any => true,
                StateFilter::LoopHead => state.is_loop_head,
            }
    }
}

impl fmt::Display for SymbolicCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locations: Vec<String> = self.locations.iter().map(ToString::to_string).collect();
        write!(f, "{} @ {{{}}}", self.formula, locations.join(","))
    }
}

/// Closed set of candidate kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandidateInvariant {
    /// No target state is reachable.
    TargetLocation,
    LocationFormula(SymbolicCandidate),
    /// Negation of a (lifted) counterexample to induction.
    BlockedCti(SymbolicCandidate),
    /// Two or more candidates proved together.
    Conjunction(BTreeSet<CandidateInvariant>),
    Obligation(Arc<Obligation>),
}

impl CandidateInvariant {
    /// Conjunction of `members`, flattened.
    ///
    /// Collapses to the single member when only one distinct candidate is
    /// left; `None` when there is nothing to conjoin.
    pub fn conjunction(members: impl IntoIterator<Item = CandidateInvariant>) -> Option<Self> {
        let mut set = BTreeSet::new();
        for member in members {
            match member {
                CandidateInvariant::Conjunction(inner) => set.extend(inner),
                other => {
                    set.insert(other);
                }
            }
        }
        match set.len() {
            0 => None,
            1 => set.pop_first(),
            _ => Some(CandidateInvariant::Conjunction(set)),
        }
    }

    pub fn obligation(obligation: Obligation) -> Self {
        CandidateInvariant::Obligation(Arc::new(obligation))
    }

    pub fn is_target(&self) -> bool {
        matches!(self, CandidateInvariant::TargetLocation)
    }

    pub fn as_obligation(&self) -> Option<&Arc<Obligation>> {
        match self {
            CandidateInvariant::Obligation(o) => Some(o),
            _ => None,
        }
    }

    /// The non-obligation candidate this one ultimately protects.
    pub fn root_cause(&self) -> &CandidateInvariant {
        match self {
            CandidateInvariant::Obligation(o) => o.root_cause(),
            other => other,
        }
    }

    /// Obligation depth; zero for anything else.
    pub fn depth(&self) -> usize {
        match self {
            CandidateInvariant::Obligation(o) => o.depth(),
            _ => 0,
        }
    }

    /// The symbolic formula carried by the candidate, if it has a single one.
    pub fn symbolic(&self) -> Option<&SymbolicCandidate> {
        match self {
            CandidateInvariant::LocationFormula(s) | CandidateInvariant::BlockedCti(s) => Some(s),
            CandidateInvariant::Obligation(o) => Some(o.blocking_clause()),
            CandidateInvariant::TargetLocation | CandidateInvariant::Conjunction(_) => None,
        }
    }

    pub fn applies_to(&self, state: &AbstractState) -> bool {
        match self {
            CandidateInvariant::TargetLocation => state.is_target,
            CandidateInvariant::Conjunction(members) => members.iter().any(|m| m.applies_to(state)),
            other => other.symbolic().is_some_and(|s| s.applies_to(state)),
        }
    }

    /// The candidate's formula instantiated at `state`; `true` where it does
    /// not apply.
    pub fn formula_at(&self, state: &AbstractState) -> SmtTerm {
        match self {
            CandidateInvariant::TargetLocation => SmtTerm::bool(!state.is_target),
            CandidateInvariant::Conjunction(members) => {
                SmtTerm::conjunction(members.iter().map(|m| m.formula_at(state)))
            }
            other => match other.symbolic() {
                Some(s) if s.applies_to(state) => state.instantiate(s.formula()),
                _ => SmtTerm::bool(true),
            },
        }
    }

    /// `AND over applicable states (path formula => formula)`.
    pub fn assertion<'a>(&self, states: impl IntoIterator<Item = &'a AbstractState>) -> SmtTerm {
        SmtTerm::conjunction(
            states
                .into_iter()
                .filter(|s| self.applies_to(s))
                .map(|s| s.path_formula.clone().implies_simplified(self.formula_at(s))),
        )
    }

    /// `OR over applicable states (path formula AND NOT formula)`; the
    /// negation of [`Self::assertion`].
    pub fn violation<'a>(&self, states: impl IntoIterator<Item = &'a AbstractState>) -> SmtTerm {
        SmtTerm::disjunction(states.into_iter().filter(|s| self.applies_to(s)).map(|s| {
            SmtTerm::conjunction(vec![s.path_formula.clone(), self.formula_at(s).negate()])
        }))
    }

    /// Prune states made redundant by the candidate being true.
    ///
    /// Only the target candidate removes anything (every target state);
    /// location formulas only restrict values and leave the set unchanged.
    /// Returns the number of removed states, so a repeated call returns 0.
    pub fn assume_truth(&self, reached: &mut ReachedSet) -> usize {
        match self {
            CandidateInvariant::TargetLocation => reached.remove_where(|s| s.is_target),
            CandidateInvariant::Conjunction(members) => {
                members.iter().map(|m| m.assume_truth(reached)).sum()
            }
            CandidateInvariant::LocationFormula(_)
            | CandidateInvariant::BlockedCti(_)
            | CandidateInvariant::Obligation(_) => 0,
        }
    }
}

impl fmt::Display for CandidateInvariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateInvariant::TargetLocation => f.write_str("target unreachable"),
            CandidateInvariant::LocationFormula(s) => write!(f, "{s}"),
            CandidateInvariant::BlockedCti(s) => write!(f, "blocked CTI {s}"),
            CandidateInvariant::Conjunction(members) => {
                let parts: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(" & "))
            }
            CandidateInvariant::Obligation(o) => write!(f, "{o}"),
        }
    }
}
