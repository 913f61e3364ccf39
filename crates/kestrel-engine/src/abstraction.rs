//! Predicate abstraction of counterexample cubes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use kestrel_smt::solver::{Model, ModelValue};
use kestrel_smt::terms::SmtTerm;
use tracing::debug;

use crate::error::EngineError;
use crate::reached::LocationId;

/// Over-approximates formulas at a location with a growing precision.
pub trait AbstractionStrategy: Send + Sync {
    /// A formula implied by `formula`, expressed in the precision of
    /// `location`.
    fn perform_abstraction(&self, formula: &SmtTerm, location: LocationId) -> Result<SmtTerm, EngineError>;

    /// Add predicates to the precision of `location`. Precisions only grow.
    fn refine_precision(&self, location: LocationId, predicates: BTreeSet<SmtTerm>);

    fn precision(&self, location: LocationId) -> BTreeSet<SmtTerm>;
}

/// Cartesian predicate abstraction over per-location predicate sets.
///
/// Cubes (conjunctions of `var = constant` and boolean literals) are mapped
/// to the conjunction of every tracked predicate, or its negation, that the
/// cube decides. Anything that is not a cube is returned unchanged.
#[derive(Debug, Default)]
pub struct PredicateAbstraction {
    precision: RwLock<BTreeMap<LocationId, BTreeSet<SmtTerm>>>,
}

impl PredicateAbstraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicates(location: LocationId, predicates: impl IntoIterator<Item = SmtTerm>) -> Self {
        let abstraction = Self::new();
        abstraction.refine_precision(location, predicates.into_iter().collect());
        abstraction
    }
}

/// Assignment described by a cube, or `None` if `formula` is not a cube.
fn cube_assignment(formula: &SmtTerm) -> Option<Model> {
    let mut values = Vec::new();
    for conjunct in formula.conjuncts() {
        match conjunct {
            SmtTerm::Eq(l, r) => match (*l, *r) {
                (SmtTerm::Var(v), SmtTerm::IntLit(n)) | (SmtTerm::IntLit(n), SmtTerm::Var(v)) => {
                    values.push((v, ModelValue::Int(n)))
                }
                _ => return None,
            },
            SmtTerm::Var(v) => values.push((v, ModelValue::Bool(true))),
            SmtTerm::Not(inner) => match *inner {
                SmtTerm::Var(v) => values.push((v, ModelValue::Bool(false))),
                _ => return None,
            },
            _ => return None,
        }
    }
    Some(values.into_iter().collect())
}

impl AbstractionStrategy for PredicateAbstraction {
    fn perform_abstraction(&self, formula: &SmtTerm, location: LocationId) -> Result<SmtTerm, EngineError> {
        let Some(cube) = cube_assignment(formula) else {
            return Ok(formula.clone());
        };
        let predicates = self.precision(location);
        let mut literals = Vec::new();
        for predicate in &predicates {
            if !predicate.variables().iter().all(|v| cube.values.contains_key(v)) {
                continue;
            }
            match cube.evaluate_bool(predicate) {
                Some(true) => literals.push(predicate.clone()),
                Some(false) => literals.push(predicate.clone().negate()),
                None => {
                    return Err(EngineError::Analysis(format!(
                        "predicate {predicate} cannot be evaluated on a cube"
                    )))
                }
            }
        }
        let abstracted = SmtTerm::conjunction(literals);
        debug!(%location, predicates = predicates.len(), abstracted = %abstracted, "cartesian abstraction");
        Ok(abstracted)
    }

    fn refine_precision(&self, location: LocationId, predicates: BTreeSet<SmtTerm>) {
        let mut precision = self.precision.write().unwrap_or_else(PoisonError::into_inner);
        let entry = precision.entry(location).or_default();
        let before = entry.len();
        entry.extend(predicates.into_iter().filter(|p| !p.is_true() && !p.is_false()));
        if entry.len() > before {
            debug!(%location, added = entry.len() - before, "refined precision");
        }
    }

    fn precision(&self, location: LocationId) -> BTreeSet<SmtTerm> {
        self.precision
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&location)
            .cloned()
            .unwrap_or_default()
    }
}
