//! Generalization of counterexamples to induction.
//!
//! Lifting runs on top of the induction query's stack, which at that point
//! holds "a successor exists", the predecessor assertion and the negated
//! successor violation. A set of CTI literals `L` is a valid generalization
//! when that stack plus the input assignment plus `L` is unsatisfiable: every
//! state in `L` then leads to the violation.

use std::collections::BTreeSet;

use kestrel_smt::prover::ResilientProver;
use kestrel_smt::solver::{FrameId, SolverError, SolverFactory};
use kestrel_smt::terms::SmtTerm;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::abstraction::AbstractionStrategy;
use crate::candidate::SymbolicCandidate;
use crate::cti::Cti;
use crate::error::EngineError;
use crate::reached::AbstractState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiftingStrategy {
    /// Block exactly the CTI.
    None,
    /// Drop every literal the solver does not need.
    #[default]
    UnsatBased,
    /// Try the predicate abstraction of the CTI first; refine the precision
    /// from an interpolant when it is too coarse.
    AbstractionBased,
}

/// A blocking clause plus successively weaker fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiftedClause {
    pub clause: SymbolicCandidate,
    pub weakenings: Vec<SymbolicCandidate>,
}

impl LiftedClause {
    pub fn exact(cti: &Cti) -> Self {
        Self {
            clause: cti.blocking_clause(),
            weakenings: Vec::new(),
        }
    }
}

pub struct LiftingRequest<'a> {
    pub cti: &'a Cti,
    /// The loop-head state the CTI was taken from.
    pub state: &'a AbstractState,
    pub split_numeral_equalities: bool,
    pub abstraction: Option<&'a dyn AbstractionStrategy>,
}

impl LiftingRequest<'_> {
    fn clause_for(&self, literals: &[SmtTerm]) -> SymbolicCandidate {
        SymbolicCandidate::at_loop_heads(
            SmtTerm::conjunction(literals.iter().cloned()).negate(),
            [self.cti.location()],
        )
    }
}

impl LiftingStrategy {
    pub fn lift<F: SolverFactory>(
        self,
        prover: &mut ResilientProver<F>,
        request: &LiftingRequest<'_>,
    ) -> Result<LiftedClause, EngineError> {
        let exact = LiftedClause::exact(request.cti);
        if self == LiftingStrategy::None || request.cti.is_empty() {
            return Ok(exact);
        }
        let mut scope = prover.scope();
        scope.push(request.state.instantiate(request.cti.input_assignment()))?;

        if self == LiftingStrategy::AbstractionBased {
            if let Some(lifted) = lift_abstract(&mut *scope, request)? {
                return Ok(lifted);
            }
        }

        let literals = if request.split_numeral_equalities {
            request.cti.split_literals()
        } else {
            request.cti.literals()
        };
        let instantiated: Vec<SmtTerm> = literals.iter().map(|l| request.state.instantiate(l)).collect();
        let Some(kept) = minimal_unsat_subset(&mut *scope, &instantiated)? else {
            debug!(cti = %request.cti, "CTI does not force the violation; blocking it exactly");
            return Ok(exact);
        };
        let kept_literals: Vec<SmtTerm> = kept.iter().map(|&i| literals[i].clone()).collect();
        debug!(
            cti = %request.cti,
            literals = literals.len(),
            kept = kept_literals.len(),
            "lifted CTI"
        );
        let concrete = request.clause_for(&kept_literals);
        let mut weakenings = Vec::new();
        if concrete != exact.clause {
            weakenings.push(exact.clause.clone());
        }

        if self == LiftingStrategy::AbstractionBased {
            let kept_instantiated: Vec<SmtTerm> = kept.iter().map(|&i| instantiated[i].clone()).collect();
            if let Some(interpolated) = refine_from_interpolant(&mut *scope, request, &kept_instantiated)? {
                weakenings.insert(0, concrete);
                return Ok(LiftedClause {
                    clause: interpolated,
                    weakenings,
                });
            }
        }
        Ok(LiftedClause {
            clause: concrete,
            weakenings,
        })
    }
}

/// Indices of a minimal subset of `literals` that makes the stack
/// unsatisfiable, or `None` if all of them together do not.
///
/// Uses the unsat core when the session provides one and pushes literals one
/// at a time otherwise; a deletion pass then removes every literal the solver
/// does not need.
pub fn minimal_unsat_subset<F: SolverFactory>(
    prover: &mut ResilientProver<F>,
    literals: &[SmtTerm],
) -> Result<Option<Vec<usize>>, EngineError> {
    let mut kept: Option<Vec<usize>> = None;
    if prover.supports_unsat_core() {
        let mut scope = prover.scope();
        let mut frames = Vec::with_capacity(literals.len());
        for literal in literals {
            frames.push(scope.push(literal.clone())?);
        }
        if !scope.is_unsat()? {
            return Ok(None);
        }
        match scope.unsat_core() {
            Ok(core) => {
                let core: BTreeSet<FrameId> = core.into_iter().collect();
                kept = Some(
                    frames
                        .iter()
                        .enumerate()
                        .filter(|(_, frame)| core.contains(*frame))
                        .map(|(i, _)| i)
                        .collect(),
                );
            }
            Err(SolverError::UnsatCoreUnsupported) => {
                debug!("unsat core unavailable; lifting literal by literal");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut kept = match kept {
        Some(kept) => kept,
        None => {
            let mut scope = prover.scope();
            let mut found = None;
            for (i, literal) in literals.iter().enumerate() {
                scope.push(literal.clone())?;
                if scope.is_unsat()? {
                    found = Some((0..=i).collect::<Vec<_>>());
                    break;
                }
            }
            match found {
                Some(found) => found,
                None => return Ok(None),
            }
        }
    };

    let mut i = 0;
    while i < kept.len() {
        let without: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, &k)| k)
            .collect();
        let mut scope = prover.scope();
        for &k in &without {
            scope.push(literals[k].clone())?;
        }
        if scope.is_unsat()? {
            kept = without;
        } else {
            i += 1;
        }
    }
    Ok(Some(kept))
}

fn lift_abstract<F: SolverFactory>(
    prover: &mut ResilientProver<F>,
    request: &LiftingRequest<'_>,
) -> Result<Option<LiftedClause>, EngineError> {
    let Some(abstraction) = request.abstraction else {
        return Ok(None);
    };
    let abstract_cti = abstraction.perform_abstraction(&request.cti.formula(), request.cti.location())?;
    if abstract_cti.is_true() {
        return Ok(None);
    }
    let literals = abstract_cti.conjuncts();
    let instantiated: Vec<SmtTerm> = literals.iter().map(|l| request.state.instantiate(l)).collect();
    let Some(kept) = minimal_unsat_subset(prover, &instantiated)? else {
        debug!(cti = %request.cti, abstraction = %abstract_cti, "abstract CTI too coarse");
        return Ok(None);
    };
    let kept_literals: Vec<SmtTerm> = kept.iter().map(|&i| literals[i].clone()).collect();
    debug!(cti = %request.cti, kept = kept_literals.len(), "lifted abstract CTI");
    Ok(Some(LiftedClause {
        clause: request.clause_for(&kept_literals),
        weakenings: vec![request.cti.blocking_clause()],
    }))
}

/// Blocking clause `NOT I` for an interpolant `I` between the kept literals
/// and the rest of the stack; the atoms of `I` join the precision.
fn refine_from_interpolant<F: SolverFactory>(
    prover: &mut ResilientProver<F>,
    request: &LiftingRequest<'_>,
    kept: &[SmtTerm],
) -> Result<Option<SymbolicCandidate>, EngineError> {
    let Some(abstraction) = request.abstraction else {
        return Ok(None);
    };
    let mut scope = prover.scope();
    let mut frames = Vec::with_capacity(kept.len());
    for literal in kept {
        frames.push(scope.push(literal.clone())?);
    }
    if !scope.is_unsat()? {
        warn!("lifted literals no longer refute the step; skipping interpolation");
        return Ok(None);
    }
    let interpolant = match scope.interpolant(&frames) {
        Ok(interpolant) => interpolant,
        Err(SolverError::InterpolationUnsupported) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Some(unindexed) = request.state.ssa.uninstantiate(&interpolant) else {
        debug!(interpolant = %interpolant, "interpolant mentions other states; ignored");
        return Ok(None);
    };
    abstraction.refine_precision(request.cti.location(), unindexed.atoms());
    Ok(Some(SymbolicCandidate::at_loop_heads(
        unindexed.negate(),
        [request.cti.location()],
    )))
}
