//! Reached-state collections produced by unrolling.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use kestrel_smt::ssa::SsaMap;
use kestrel_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};

/// A control-flow location of the analyzed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub u32);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// How a state's path formula is represented.
///
/// BMC only works on a pure path encoding: one abstraction state at the root
/// and raw path formulas everywhere below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Abstraction,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractState {
    pub id: StateId,
    pub location: LocationId,
    pub kind: StateKind,
    pub parent: Option<StateId>,
    /// Conjunction of all constraints from the root, over SSA-indexed names.
    pub path_formula: SmtTerm,
    pub ssa: SsaMap,
    /// Loop iteration the state belongs to; loop heads start at 1.
    pub loop_iteration: usize,
    pub is_loop_head: bool,
    pub is_target: bool,
    /// Created by unrolling but not expanded because the bound was reached.
    pub bound_stopped: bool,
}

impl AbstractState {
    pub fn new(location: LocationId, parent: Option<StateId>, path_formula: SmtTerm, ssa: SsaMap) -> Self {
        Self {
            id: StateId(0),
            location,
            kind: StateKind::Raw,
            parent,
            path_formula,
            ssa,
            loop_iteration: 0,
            is_loop_head: false,
            is_target: false,
            bound_stopped: false,
        }
    }

    pub fn with_kind(mut self, kind: StateKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn at_loop_head(mut self, iteration: usize) -> Self {
        self.is_loop_head = true;
        self.loop_iteration = iteration;
        self
    }

    pub fn in_iteration(mut self, iteration: usize) -> Self {
        self.loop_iteration = iteration;
        self
    }

    pub fn as_target(mut self) -> Self {
        self.is_target = true;
        self
    }

    /// Instantiate an unindexed formula with this state's SSA indices.
    pub fn instantiate(&self, formula: &SmtTerm) -> SmtTerm {
        self.ssa.instantiate(formula)
    }
}

/// Ordered collection of reached states plus the waitlist of states still to
/// be expanded.
#[derive(Debug, Clone, Default)]
pub struct ReachedSet {
    states: IndexMap<StateId, AbstractState>,
    waitlist: IndexSet<StateId>,
    next_id: usize,
}

impl ReachedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state, assign its id and put it on the waitlist.
    pub fn add(&mut self, mut state: AbstractState) -> StateId {
        let id = StateId(self.next_id);
        self.next_id += 1;
        state.id = id;
        self.states.insert(id, state);
        self.waitlist.insert(id);
        id
    }

    pub fn get(&self, id: StateId) -> Option<&AbstractState> {
        self.states.get(&id)
    }

    pub fn get_mut(&mut self, id: StateId) -> Option<&mut AbstractState> {
        self.states.get_mut(&id)
    }

    pub fn first(&self) -> Option<&AbstractState> {
        self.states.values().next()
    }

    pub fn states(&self) -> impl Iterator<Item = &AbstractState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn targets(&self) -> impl Iterator<Item = &AbstractState> {
        self.states().filter(|s| s.is_target)
    }

    pub fn loop_heads(&self) -> impl Iterator<Item = &AbstractState> {
        self.states().filter(|s| s.is_loop_head)
    }

    pub fn bound_stopped(&self) -> impl Iterator<Item = &AbstractState> {
        self.states().filter(|s| s.bound_stopped)
    }

    pub fn pop_waiting(&mut self) -> Option<StateId> {
        self.waitlist.shift_remove_index(0)
    }

    /// Put an already reached state back on the waitlist.
    pub fn reactivate(&mut self, id: StateId) {
        if self.states.contains_key(&id) {
            self.waitlist.insert(id);
        }
    }

    /// The root abstraction state followed only by raw states.
    pub fn is_pure_path_encoding(&self) -> bool {
        let mut states = self.states.values();
        match states.next() {
            Some(root) if root.kind == StateKind::Abstraction => {
                states.all(|s| s.kind == StateKind::Raw)
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Remove every state matching `pred`; returns how many were removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&AbstractState) -> bool) -> usize {
        let doomed: Vec<StateId> = self
            .states
            .values()
            .filter(|s| pred(s))
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            self.states.shift_remove(id);
            self.waitlist.shift_remove(id);
        }
        doomed.len()
    }

    /// State ids from the root to `id`, inclusive.
    pub fn path(&self, id: StateId) -> Vec<StateId> {
        let mut path = Vec::new();
        let mut current = self.states.get(&id);
        while let Some(state) = current {
            path.push(state.id);
            current = state.parent.and_then(|p| self.states.get(&p));
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> AbstractState {
        AbstractState::new(LocationId(0), None, SmtTerm::bool(true), SsaMap::new())
            .with_kind(StateKind::Abstraction)
    }

    #[test]
    fn path_follows_parents() {
        let mut reached = ReachedSet::new();
        let r = reached.add(root());
        let a = reached.add(AbstractState::new(LocationId(1), Some(r), SmtTerm::bool(true), SsaMap::new()));
        let b = reached.add(AbstractState::new(LocationId(2), Some(a), SmtTerm::bool(true), SsaMap::new()).as_target());
        assert_eq!(reached.path(b), vec![r, a, b]);
        assert_eq!(reached.targets().count(), 1);
    }

    #[test]
    fn interleaved_abstraction_is_not_pure() {
        let mut reached = ReachedSet::new();
        let r = reached.add(root());
        assert!(reached.is_pure_path_encoding());
        reached.add(
            AbstractState::new(LocationId(1), Some(r), SmtTerm::bool(true), SsaMap::new())
                .with_kind(StateKind::Abstraction),
        );
        assert!(!reached.is_pure_path_encoding());
    }

    #[test]
    fn removal_clears_waitlist() {
        let mut reached = ReachedSet::new();
        let r = reached.add(root());
        let t = reached.add(AbstractState::new(LocationId(9), Some(r), SmtTerm::bool(true), SsaMap::new()).as_target());
        assert_eq!(reached.remove_where(|s| s.is_target), 1);
        assert!(!reached.contains(t));
        assert_eq!(reached.pop_waiting(), Some(r));
        assert_eq!(reached.pop_waiting(), None);
    }
}
