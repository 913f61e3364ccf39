use std::fmt;

use kestrel_smt::solver::Model;
use tracing::debug;

use crate::reached::{ReachedSet, StateId};

/// A concrete path from the initial state to a reachable target state.
#[derive(Debug, Clone, PartialEq)]
pub struct Counterexample {
    target: StateId,
    path: Vec<StateId>,
    loop_iterations: usize,
    model: Model,
}

impl Counterexample {
    /// Pick the target whose path formula the model satisfies.
    ///
    /// Among several satisfied targets the one with the shortest path wins.
    pub fn from_model(reached: &ReachedSet, model: Model) -> Option<Self> {
        let target = reached
            .targets()
            .filter(|s| model.evaluate_bool(&s.path_formula) == Some(true))
            .min_by_key(|s| (reached.path(s.id).len(), s.id))?;
        let path = reached.path(target.id);
        let loop_iterations = path
            .iter()
            .filter_map(|id| reached.get(*id))
            .map(|s| s.loop_iteration)
            .max()
            .unwrap_or(0);
        debug!(target = %target.id, states = path.len(), loop_iterations, "built counterexample");
        Some(Self {
            target: target.id,
            path,
            loop_iterations,
            model,
        })
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    /// States from the root to the target, in order.
    pub fn path(&self) -> &[StateId] {
        &self.path
    }

    /// Highest loop iteration entered on the path.
    pub fn loop_iterations(&self) -> usize {
        self.loop_iterations
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "counterexample reaching {} after {} loop iterations:", self.target, self.loop_iterations)?;
        for id in &self.path {
            write!(f, " {id}")?;
        }
        Ok(())
    }
}

/// Receives every counterexample the engine reports.
pub trait CounterexampleExporter {
    fn export(&mut self, reached: &ReachedSet, counterexample: &Counterexample);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl CounterexampleExporter for NoopExporter {
    fn export(&mut self, _reached: &ReachedSet, _counterexample: &Counterexample) {}
}
