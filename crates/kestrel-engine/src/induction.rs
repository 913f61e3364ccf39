//! The k-induction step case.
//!
//! For a bound `k` the step-case reached set starts in an arbitrary loop-head
//! state. A candidate is k-inductive when every path that satisfies the
//! predecessor assumptions for `k` iterations also satisfies the candidate in
//! iteration `k + 1`. When it is not, the model is turned into
//! counterexamples to induction and lifted into blocking clauses.

use std::collections::BTreeSet;
use std::sync::Arc;

use kestrel_smt::prover::{ProverStatistics, ResilientProver};
use kestrel_smt::shutdown::ShutdownNotifier;
use kestrel_smt::solver::{FrameId, SessionConfig, SolverError, SolverFactory};
use kestrel_smt::terms::SmtTerm;
use tracing::{debug, info, trace};

use crate::abstraction::AbstractionStrategy;
use crate::candidate::{CandidateInvariant, SymbolicCandidate};
use crate::cti::Cti;
use crate::error::EngineError;
use crate::invgen::{InvariantGenerator, InvariantMap};
use crate::lifting::{LiftedClause, LiftingRequest, LiftingStrategy};
use crate::options::BmcOptions;
use crate::reached::{AbstractState, ReachedSet};
use crate::unroller::Unroller;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InductionResult<T> {
    Successful(T),
    Failed {
        blocking_clauses: BTreeSet<LiftedClause>,
        k: usize,
    },
}

impl<T> InductionResult<T> {
    pub fn is_successful(&self) -> bool {
        matches!(self, InductionResult::Successful(_))
    }

    /// # Panics
    ///
    /// Panics if the check failed.
    pub fn invariant_refinement(&self) -> &T {
        match self {
            InductionResult::Successful(refinement) => refinement,
            InductionResult::Failed { .. } => panic!("no invariant refinement: induction failed"),
        }
    }

    /// # Panics
    ///
    /// Panics if the check succeeded.
    pub fn bad_state_blocking_clauses(&self) -> &BTreeSet<LiftedClause> {
        match self {
            InductionResult::Failed { blocking_clauses, .. } => blocking_clauses,
            InductionResult::Successful(_) => panic!("no blocking clauses: induction succeeded"),
        }
    }

    /// # Panics
    ///
    /// Panics if the check succeeded.
    pub fn k(&self) -> usize {
        match self {
            InductionResult::Failed { k, .. } => *k,
            InductionResult::Successful(_) => panic!("no bound: induction succeeded"),
        }
    }
}

/// `(k, candidate, violation)` of a candidate proved at bound `k`.
type ConfirmedViolation = (usize, CandidateInvariant, SmtTerm);

pub struct KInductionProver<F: SolverFactory, U: Unroller> {
    unroller: U,
    reached: ReachedSet,
    unrolled_to: Option<usize>,
    prover: ResilientProver<F>,
    confirmed_violations: Vec<ConfirmedViolation>,
    invariants: Arc<InvariantMap>,
    lifting: LiftingStrategy,
    split_numeral_equalities: bool,
    abstract_proved_invariants: bool,
    abstraction: Option<Arc<dyn AbstractionStrategy>>,
}

impl<F: SolverFactory, U: Unroller> KInductionProver<F, U> {
    pub fn new(
        factory: F,
        unroller: U,
        options: &BmcOptions,
        abstraction: Option<Arc<dyn AbstractionStrategy>>,
        shutdown: ShutdownNotifier,
    ) -> Result<Self, EngineError> {
        let config = SessionConfig {
            interpolation: options.interpolation
                || options.abstract_proved_invariants
                || options.lifting == LiftingStrategy::AbstractionBased,
            unsat_core: options.unsat_cores,
        };
        let prover = ResilientProver::new(factory, config, shutdown)?;
        let reached = unroller.initial_reached();
        Ok(Self {
            unroller,
            reached,
            unrolled_to: None,
            prover,
            confirmed_violations: Vec::new(),
            invariants: Arc::new(InvariantMap::trivial()),
            lifting: options.lifting,
            split_numeral_equalities: options.split_numeral_equalities,
            abstract_proved_invariants: options.abstract_proved_invariants,
            abstraction,
        })
    }

    pub fn prover_statistics(&self) -> &ProverStatistics {
        self.prover.statistics()
    }

    pub fn reached(&self) -> &ReachedSet {
        &self.reached
    }

    /// Unroll the step case so that iteration `k + 1` is fully present.
    fn ensure_k(&mut self, k: usize) -> Result<(), EngineError> {
        let needed = k + 1;
        if self.unrolled_to.is_some_and(|done| done >= needed) {
            return Ok(());
        }
        debug!(bound = needed, "unrolling step case");
        self.unroller.unroll(&mut self.reached, needed)?;
        self.unrolled_to = Some(needed);
        Ok(())
    }

    /// Check whether `candidate` is `k`-inductive.
    ///
    /// `predecessors` are assumed at every step-case state whose loop
    /// iteration is in `checked_iterations` and at most `k`; they normally
    /// hold the confirmed candidates and `candidate` itself.
    pub fn check(
        &mut self,
        predecessors: &[CandidateInvariant],
        k: usize,
        candidate: &CandidateInvariant,
        checked_iterations: &BTreeSet<usize>,
        generator: &dyn InvariantGenerator,
    ) -> Result<InductionResult<Option<SymbolicCandidate>>, EngineError> {
        self.ensure_k(k)?;
        self.confirmed_violations.retain(|(bound, _, _)| *bound == k);

        let hypothesized: Vec<&AbstractState> = self
            .reached
            .states()
            .filter(|s| s.loop_iteration <= k && checked_iterations.contains(&s.loop_iteration))
            .collect();
        let successors: Vec<&AbstractState> = self
            .reached
            .states()
            .filter(|s| s.loop_iteration == k + 1)
            .collect();

        let mut pred_parts = Vec::with_capacity(predecessors.len());
        for predecessor in predecessors {
            if predecessor.is_target() {
                // A target path is never continued, so no earlier violation
                // can be passed through.
                continue;
            }
            pred_parts.push(predecessor.assertion(hypothesized.iter().copied()));
            if let Some((_, _, violation)) = self
                .confirmed_violations
                .iter()
                .find(|(_, c, _)| c == predecessor)
            {
                pred_parts.push(violation.clone().negate());
            }
        }
        let predecessor_assertion = SmtTerm::conjunction(pred_parts);
        let successor_exists = SmtTerm::disjunction(successors.iter().map(|s| s.path_formula.clone()));
        let violation = candidate.violation(successors.iter().copied());
        let successor_state_for_abstraction = successors
            .iter()
            .find(|s| s.is_loop_head)
            .map(|s| (*s).clone());

        loop {
            let invariant_assertion = self.invariants.assertion(self.reached.states());
            let mut scope = self.prover.scope();
            let exists_frame = scope.push(successor_exists.clone())?;
            let pred_frame = scope.push(predecessor_assertion.clone())?;
            let inv_frame = scope.push(invariant_assertion)?;
            scope.push(violation.clone())?;
            info!(k, candidate = %candidate, "k-induction: step check");

            if scope.is_unsat()? {
                debug!(k, candidate = %candidate, "k-induction: candidate is inductive");
                let refinement = if self.abstract_proved_invariants {
                    match successor_state_for_abstraction.as_ref() {
                        Some(head) => abstract_proved_invariant(
                            &mut *scope,
                            &[exists_frame, pred_frame, inv_frame],
                            head,
                            self.abstraction.as_deref(),
                        )?,
                        None => None,
                    }
                } else {
                    None
                };
                drop(scope);
                self.confirmed_violations.push((k, candidate.clone(), violation));
                return Ok(InductionResult::Successful(refinement));
            }

            let latest = generator.supplier();
            if latest.version() != self.invariants.version() {
                debug!(
                    k,
                    from = self.invariants.version(),
                    to = latest.version(),
                    "k-induction: retrying with new external invariants"
                );
                drop(scope);
                self.invariants = latest;
                continue;
            }

            let model = scope.model()?;
            let ctis: Vec<(Cti, &AbstractState)> = self
                .reached
                .states()
                .filter(|s| s.is_loop_head && s.loop_iteration == 1)
                .map(|s| (Cti::from_model(&model, s, |v| self.unroller.is_input(v)), s))
                .collect();
            trace!(k, ctis = ctis.len(), "k-induction: extracted counterexamples");

            scope.pop();
            scope.push(violation.clone().negate())?;
            let mut blocking_clauses = BTreeSet::new();
            for (cti, state) in &ctis {
                let request = LiftingRequest {
                    cti,
                    state,
                    split_numeral_equalities: self.split_numeral_equalities,
                    abstraction: self.abstraction.as_deref(),
                };
                let lifted = self.lifting.lift(&mut *scope, &request)?;
                debug!(k, %cti, clause = %lifted.clause, "k-induction: blocking clause");
                blocking_clauses.insert(lifted);
            }
            return Ok(InductionResult::Failed { blocking_clauses, k });
        }
    }
}

/// Interpolate between the hypotheses and the violation of a proved
/// candidate and express the result at the successor loop head.
fn abstract_proved_invariant<F: SolverFactory>(
    prover: &mut ResilientProver<F>,
    hypotheses: &[FrameId],
    head: &AbstractState,
    abstraction: Option<&dyn AbstractionStrategy>,
) -> Result<Option<SymbolicCandidate>, EngineError> {
    let interpolant = match prover.interpolant(hypotheses) {
        Ok(interpolant) => interpolant,
        Err(SolverError::InterpolationUnsupported) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Some(unindexed) = head.ssa.uninstantiate(&interpolant) else {
        debug!(interpolant = %interpolant, "proved invariant interpolant spans several states");
        return Ok(None);
    };
    if unindexed.is_true() {
        return Ok(None);
    }
    if let Some(abstraction) = abstraction {
        abstraction.refine_precision(head.location, unindexed.atoms());
    }
    Ok(Some(SymbolicCandidate::at_loop_heads(unindexed, [head.location])))
}
