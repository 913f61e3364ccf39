//! Counterexamples to inductivity.

use std::fmt;

use im::OrdMap;
use kestrel_smt::solver::{Model, ModelValue};
use kestrel_smt::ssa::parse_indexed;
use kestrel_smt::terms::SmtTerm;

use crate::candidate::SymbolicCandidate;
use crate::reached::{AbstractState, LocationId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtiValue {
    pub value: ModelValue,
    /// `name = value` over the unindexed name.
    pub formula: SmtTerm,
}

/// A concrete loop-head state from which one more step violates the
/// candidate.
///
/// The assignment map is persistent; [`Cti::drop_literal`] shares structure
/// with the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cti {
    location: LocationId,
    assignments: OrdMap<String, CtiValue>,
    input_assignment: SmtTerm,
}

fn literal(name: &str, value: ModelValue) -> SmtTerm {
    match value {
        ModelValue::Int(n) => SmtTerm::var(name).eq(SmtTerm::int(n)),
        ModelValue::Bool(true) => SmtTerm::var(name),
        ModelValue::Bool(false) => SmtTerm::var(name).not(),
    }
}

impl Cti {
    pub fn new(location: LocationId, values: impl IntoIterator<Item = (String, ModelValue)>) -> Self {
        let assignments = values
            .into_iter()
            .map(|(name, value)| {
                let formula = literal(&name, value);
                (name, CtiValue { value, formula })
            })
            .collect();
        Self {
            location,
            assignments,
            input_assignment: SmtTerm::bool(true),
        }
    }

    /// Snapshot of `state` in `model`.
    ///
    /// Keeps only values at the variable's current SSA index in `state`.
    /// Inputs go to the input assignment instead of the CTI body.
    pub fn from_model(model: &Model, state: &AbstractState, is_input: impl Fn(&str) -> bool) -> Self {
        let mut assignments = OrdMap::new();
        let mut inputs = Vec::new();
        let mut entries: Vec<_> = model.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (indexed, value) in entries {
            if !state.ssa.is_current(indexed) {
                continue;
            }
            let Some((base, _)) = parse_indexed(indexed) else {
                continue;
            };
            let formula = literal(base, *value);
            if is_input(base) {
                inputs.push(formula);
            } else {
                assignments.insert(
                    base.to_string(),
                    CtiValue {
                        value: *value,
                        formula,
                    },
                );
            }
        }
        Self {
            location: state.location,
            assignments,
            input_assignment: SmtTerm::conjunction(inputs),
        }
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn assignments(&self) -> &OrdMap<String, CtiValue> {
        &self.assignments
    }

    /// Narrows the counterexample without being part of it.
    pub fn input_assignment(&self) -> &SmtTerm {
        &self.input_assignment
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn drop_literal(&self, name: &str) -> Cti {
        Cti {
            location: self.location,
            assignments: self.assignments.without(name),
            input_assignment: self.input_assignment.clone(),
        }
    }

    /// One literal per variable, in variable order.
    pub fn literals(&self) -> Vec<SmtTerm> {
        self.assignments.values().map(|v| v.formula.clone()).collect()
    }

    /// Like [`Cti::literals`], with every integer equality split into `<=`
    /// and `>=` so each bound can be dropped on its own.
    pub fn split_literals(&self) -> Vec<SmtTerm> {
        let mut out = Vec::with_capacity(self.assignments.len() * 2);
        for (name, v) in self.assignments.iter() {
            match v.value {
                ModelValue::Int(n) => {
                    out.push(SmtTerm::var(name.as_str()).le(SmtTerm::int(n)));
                    out.push(SmtTerm::var(name.as_str()).ge(SmtTerm::int(n)));
                }
                ModelValue::Bool(_) => out.push(v.formula.clone()),
            }
        }
        out
    }

    pub fn formula(&self) -> SmtTerm {
        SmtTerm::conjunction(self.literals())
    }

    /// The CTI's negation as a loop-head candidate.
    pub fn blocking_clause(&self) -> SymbolicCandidate {
        SymbolicCandidate::at_loop_heads(self.formula().negate(), [self.location])
    }
}

impl fmt::Display for Cti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .assignments
            .iter()
            .map(|(name, v)| format!("{name}={}", v.value))
            .collect();
        write!(f, "CTI@{} [{}]", self.location, parts.join(", "))
    }
}
