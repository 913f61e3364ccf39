//! The bounded model checking / k-induction control loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_smt::prover::ResilientProver;
use kestrel_smt::shutdown::ShutdownNotifier;
use kestrel_smt::solver::{Model, SessionConfig, SolverFactory};
use kestrel_smt::terms::SmtTerm;
use tracing::{debug, info, warn};

use crate::abstraction::AbstractionStrategy;
use crate::candidate::CandidateInvariant;
use crate::counterexample::{Counterexample, CounterexampleExporter, NoopExporter};
use crate::error::EngineError;
use crate::induction::{InductionResult, KInductionProver};
use crate::invgen::{DoNothingInvariantGenerator, InvariantGenerator};
use crate::obligation::Obligation;
use crate::options::BmcOptions;
use crate::pool::CandidatePool;
use crate::property_directed::PropertyDirectedRefiner;
use crate::reached::ReachedSet;
use crate::stats::BmcStatistics;
use crate::unroller::Unroller;

/// Verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmStatus {
    /// Every pending candidate holds on every reachable state.
    pub sound: bool,
    /// A reported violation is a real one.
    pub precise: bool,
}

impl AlgorithmStatus {
    pub const SOUND_AND_PRECISE: AlgorithmStatus = AlgorithmStatus {
        sound: true,
        precise: true,
    };
    pub const UNSOUND_AND_PRECISE: AlgorithmStatus = AlgorithmStatus {
        sound: false,
        precise: true,
    };
    pub const UNSOUND_AND_IMPRECISE: AlgorithmStatus = AlgorithmStatus {
        sound: false,
        precise: false,
    };
}

fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Iterative-deepening BMC with k-induction over a candidate pool.
///
/// The base case is unrolled into the reached set given to [`run`]; the step
/// case uses its own unroller, set with [`with_step_case`]. Without one,
/// induction is disabled.
///
/// [`run`]: BmcAlgorithm::run
/// [`with_step_case`]: BmcAlgorithm::with_step_case
pub struct BmcAlgorithm<F: SolverFactory + Clone, U: Unroller> {
    options: BmcOptions,
    factory: F,
    unroller: U,
    step_case: Option<U>,
    pool: CandidatePool,
    confirmed: Vec<CandidateInvariant>,
    generator: Box<dyn InvariantGenerator>,
    abstraction: Option<Arc<dyn AbstractionStrategy>>,
    exporter: Box<dyn CounterexampleExporter>,
    shutdown: ShutdownNotifier,
    counterexample: Option<Counterexample>,
    stats: BmcStatistics,
}

impl<F: SolverFactory + Clone, U: Unroller> BmcAlgorithm<F, U> {
    pub fn new(options: BmcOptions, factory: F, unroller: U, pool: CandidatePool) -> Self {
        Self {
            options,
            factory,
            unroller,
            step_case: None,
            pool,
            confirmed: Vec::new(),
            generator: Box::new(DoNothingInvariantGenerator::default()),
            abstraction: None,
            exporter: Box::new(NoopExporter),
            shutdown: ShutdownNotifier::new(),
            counterexample: None,
            stats: BmcStatistics::default(),
        }
    }

    pub fn with_step_case(mut self, step_case: U) -> Self {
        self.step_case = Some(step_case);
        self
    }

    pub fn with_invariant_generator(mut self, generator: Box<dyn InvariantGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_abstraction(mut self, abstraction: Arc<dyn AbstractionStrategy>) -> Self {
        self.abstraction = Some(abstraction);
        self
    }

    pub fn with_exporter(mut self, exporter: Box<dyn CounterexampleExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownNotifier) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Candidates proved so far, in the order they were proved.
    pub fn confirmed_candidates(&self) -> &[CandidateInvariant] {
        &self.confirmed
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn counterexample(&self) -> Option<&Counterexample> {
        self.counterexample.as_ref()
    }

    pub fn statistics(&self) -> &BmcStatistics {
        &self.stats
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    /// Run until the pool is decided, a counterexample is found or the bound
    /// schedule is exhausted.
    ///
    /// Consumes the step case; a second call runs without induction.
    pub fn run(&mut self, reached: &mut ReachedSet) -> Result<AlgorithmStatus, EngineError> {
        let Some(initial) = reached.first().map(|s| s.location) else {
            return Err(EngineError::Analysis("reached set has no initial state".to_string()));
        };
        let mut k_prover = self.setup_induction()?;
        self.generator.start(initial)?;
        self.generator.wait_for_head_start(&self.shutdown, self.options.head_start);

        let mut prover = ResilientProver::new(self.factory.clone(), SessionConfig::PLAIN, self.shutdown.clone())?;
        let result = self.run_loop(reached, &mut prover, k_prover.as_mut());
        self.generator.cancel();

        self.stats.solver_time = prover.statistics().solver_time
            + k_prover
                .as_ref()
                .map_or(Duration::ZERO, |k| k.prover_statistics().solver_time);
        match &result {
            Ok(status) => info!(
                sound = status.sound,
                precise = status.precise,
                iterations = self.stats.iterations,
                "BMC finished"
            ),
            Err(err) => warn!(error = %err, "BMC aborted"),
        }
        result
    }

    /// Build the step-case prover, or disable induction with a warning when
    /// the program does not allow it.
    fn setup_induction(&mut self) -> Result<Option<KInductionProver<F, U>>, EngineError> {
        if !self.options.induction {
            return Ok(None);
        }
        let Some(step_case) = self.step_case.take() else {
            warn!("no step case configured; disabling induction");
            return Ok(None);
        };
        let heads = self.unroller.loop_heads();
        if heads.len() != 1 {
            warn!(
                loop_heads = heads.len(),
                "induction needs exactly one loop head; disabling induction"
            );
            return Ok(None);
        }
        let prover = KInductionProver::new(
            self.factory.clone(),
            step_case,
            &self.options,
            self.abstraction.clone(),
            self.shutdown.clone(),
        )?;
        Ok(Some(prover))
    }

    fn run_loop(
        &mut self,
        reached: &mut ReachedSet,
        prover: &mut ResilientProver<F>,
        mut k_prover: Option<&mut KInductionProver<F, U>>,
    ) -> Result<AlgorithmStatus, EngineError> {
        let deadline = (self.options.timeout_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(self.options.timeout_secs));
        let mut refiner = PropertyDirectedRefiner::new();
        let mut bound = self.options.initial_bound.max(1);

        loop {
            if deadline_exceeded(deadline) {
                self.shutdown.request("timeout");
            }
            self.shutdown.check()?;
            self.stats.iterations += 1;

            info!(bound, "BMC: unrolling");
            let unroll_status = self.unroller.unroll(reached, bound)?;
            if !reached.is_pure_path_encoding() {
                warn!("reached set mixes abstraction states into the path encoding; BMC needs a pure path-formula encoding");
                return Ok(AlgorithmStatus::UNSOUND_AND_IMPRECISE);
            }
            if self.program_proved_safe(reached) {
                return Ok(AlgorithmStatus::SOUND_AND_PRECISE);
            }

            let invariants = self.generator.supplier().assertion(reached.states());
            let mut skipped = BTreeSet::new();
            let mut held = Vec::new();
            if let Some(status) = self.bmc_pass(reached, prover, &invariants, bound, &mut skipped, &mut held)? {
                return Ok(status);
            }

            if unroll_status.sound
                && self.options.bounding_assertions
                && !self.pool.is_empty()
                && self.frontier_unreachable(reached, prover, &invariants)?
            {
                info!(bound, "BMC: state space exhausted; candidates that held are confirmed");
                self.confirm_held(reached, held);
                if self.pool.is_empty() || self.confirmed.contains(&CandidateInvariant::TargetLocation) {
                    return Ok(self.settled_status());
                }
                debug!(bound, pending = self.pool.len(), "BMC: re-checking weakenings on the exhausted state space");
                continue;
            }

            if let Some(k_prover) = k_prover.as_deref_mut() {
                if self.options.property_directed {
                    self.refine_obligations(&mut refiner, prover, reached, &invariants)?;
                }
                self.induction_pass(k_prover, reached, bound, &skipped)?;
            }

            if self.program_proved_safe(reached) || self.confirmed.contains(&CandidateInvariant::TargetLocation) {
                return Ok(AlgorithmStatus::SOUND_AND_PRECISE);
            }
            if self.pool.roots().next().is_none() {
                info!(bound, "all candidates decided");
                return Ok(self.settled_status());
            }

            match self.options.next_bound(bound) {
                Some(next) => bound = next,
                None => {
                    info!(bound, "bound schedule exhausted without a verdict");
                    return Ok(AlgorithmStatus::UNSOUND_AND_PRECISE);
                }
            }
        }
    }

    fn program_proved_safe(&mut self, reached: &mut ReachedSet) -> bool {
        if !self.generator.is_program_safe() {
            return false;
        }
        info!("invariant generator proved the program safe");
        CandidateInvariant::TargetLocation.assume_truth(reached);
        self.pool.confirm(&CandidateInvariant::TargetLocation);
        if !self.confirmed.contains(&CandidateInvariant::TargetLocation) {
            self.confirmed.push(CandidateInvariant::TargetLocation);
        }
        true
    }

    /// Verdict once every root is decided and no target was reached.
    ///
    /// Refuted roots with nothing confirmed mean nothing was proved.
    fn settled_status(&self) -> AlgorithmStatus {
        if self.confirmed.is_empty() && self.stats.roots_refuted > 0 {
            warn!(refuted = self.stats.roots_refuted, "every candidate was refuted; nothing proved");
            return AlgorithmStatus::UNSOUND_AND_IMPRECISE;
        }
        AlgorithmStatus::SOUND_AND_PRECISE
    }

    /// Check every pending candidate on the unrolled base case.
    ///
    /// Returns a final status when the target candidate is violated.
    /// Candidates that hold are appended to `held`. Candidates refuted here,
    /// and the weakenings replacing them, are added to `skipped`; a
    /// weakening is not checked before the next pass.
    fn bmc_pass(
        &mut self,
        reached: &mut ReachedSet,
        prover: &mut ResilientProver<F>,
        invariants: &SmtTerm,
        bound: usize,
        skipped: &mut BTreeSet<CandidateInvariant>,
        held: &mut Vec<CandidateInvariant>,
    ) -> Result<Option<AlgorithmStatus>, EngineError> {
        for candidate in self.pool.bmc_order() {
            if !self.pool.contains(&candidate) {
                continue;
            }
            self.stats.bmc_checks += 1;
            let violation = candidate.violation(reached.states());
            let mut scope = prover.scope();
            scope.push(invariants.clone())?;
            scope.push(violation)?;
            debug!(bound, candidate = %candidate, "BMC: checking candidate");

            if scope.is_unsat()? {
                drop(scope);
                let pruned = candidate.assume_truth(reached);
                debug!(bound, candidate = %candidate, pruned, "BMC: candidate holds");
                held.push(candidate);
                continue;
            }

            if candidate.is_target() {
                let model = scope.model()?;
                drop(scope);
                return Ok(Some(self.report_violation(reached, model)));
            }
            drop(scope);
            debug!(bound, candidate = %candidate, depth = candidate.depth(), "BMC: candidate refuted");
            if candidate.as_obligation().is_none() {
                self.stats.roots_refuted += 1;
            }
            skipped.insert(candidate.clone());
            if let Some(weakened) = self.pool.refute(&candidate) {
                self.stats.weakenings_used += 1;
                skipped.insert(weakened);
            }
        }
        Ok(None)
    }

    fn report_violation(&mut self, reached: &ReachedSet, model: Model) -> AlgorithmStatus {
        match Counterexample::from_model(reached, model) {
            Some(cex) => {
                info!(
                    target = %cex.target(),
                    loop_iterations = cex.loop_iterations(),
                    "BMC: target reachable"
                );
                self.exporter.export(reached, &cex);
                self.counterexample = Some(cex);
                AlgorithmStatus::UNSOUND_AND_PRECISE
            }
            None => {
                warn!("violation is satisfiable but no counterexample could be constructed");
                AlgorithmStatus::UNSOUND_AND_IMPRECISE
            }
        }
    }

    /// Whether no state at which unrolling stopped is reachable.
    fn frontier_unreachable(
        &mut self,
        reached: &ReachedSet,
        prover: &mut ResilientProver<F>,
        invariants: &SmtTerm,
    ) -> Result<bool, EngineError> {
        self.stats.bounding_checks += 1;
        let frontier = SmtTerm::disjunction(reached.bound_stopped().map(|s| s.path_formula.clone()));
        if frontier.is_false() {
            return Ok(true);
        }
        let mut scope = prover.scope();
        scope.push(invariants.clone())?;
        scope.push(frontier)?;
        Ok(scope.is_unsat()?)
    }

    /// Confirm the candidates that held on an exhausted state space.
    ///
    /// Entries already dropped from the pool, by a refuted or confirmed
    /// root, are skipped.
    fn confirm_held(&mut self, reached: &mut ReachedSet, held: Vec<CandidateInvariant>) {
        for candidate in held {
            if !self.pool.contains(&candidate) {
                continue;
            }
            candidate.assume_truth(reached);
            self.pool.confirm(&candidate);
            if candidate.as_obligation().is_some() {
                self.stats.obligations_confirmed += 1;
            }
            self.confirmed.push(candidate);
        }
    }

    fn refine_obligations(
        &mut self,
        refiner: &mut PropertyDirectedRefiner,
        prover: &mut ResilientProver<F>,
        reached: &ReachedSet,
        invariants: &SmtTerm,
    ) -> Result<(), EngineError> {
        let obligations: Vec<_> = self.pool.obligations().cloned().collect();
        for obligation in obligations {
            if let Some(refined) = refiner.refine(prover, reached, invariants, &obligation)? {
                self.stats.property_directed_refinements += 1;
                self.pool.replace_obligation(&obligation, refined);
            }
        }
        Ok(())
    }

    fn induction_pass(
        &mut self,
        k_prover: &mut KInductionProver<F, U>,
        reached: &mut ReachedSet,
        k: usize,
        skipped: &BTreeSet<CandidateInvariant>,
    ) -> Result<(), EngineError> {
        let checked: BTreeSet<usize> = (1..=k).collect();
        for candidate in self.pool.induction_order() {
            if skipped.contains(&candidate) || !self.pool.contains(&candidate) {
                continue;
            }
            self.shutdown.check()?;
            self.stats.induction_checks += 1;
            let predecessors: Vec<CandidateInvariant> = self
                .confirmed
                .iter()
                .cloned()
                .chain(std::iter::once(candidate.clone()))
                .collect();
            let result = k_prover.check(&predecessors, k, &candidate, &checked, self.generator.as_ref())?;
            match result {
                InductionResult::Successful(refinement) => {
                    self.stats.induction_successes += 1;
                    info!(k, candidate = %candidate, depth = candidate.depth(), "k-induction: candidate confirmed");
                    if candidate.as_obligation().is_some() {
                        self.stats.obligations_confirmed += 1;
                    }
                    candidate.assume_truth(reached);
                    self.pool.confirm(&candidate);
                    self.confirmed.push(candidate);
                    if let Some(abstracted) = refinement {
                        let abstracted = CandidateInvariant::LocationFormula(abstracted);
                        if !self.confirmed.contains(&abstracted) && self.pool.add(abstracted.clone()) {
                            self.stats.abstracted_invariants += 1;
                            debug!(k, candidate = %abstracted, "queued abstraction of proved invariant");
                        }
                    }
                }
                InductionResult::Failed { blocking_clauses, k } => {
                    self.stats.induction_failures += 1;
                    self.stats.ctis += blocking_clauses.len();
                    debug!(k, candidate = %candidate, ctis = blocking_clauses.len(), "k-induction: candidate not inductive");
                    if let Some(obligation) = candidate.as_obligation() {
                        if !obligation.weakenings().is_empty() {
                            if self.pool.refute(&candidate).is_some() {
                                self.stats.weakenings_used += 1;
                            }
                            continue;
                        }
                        if obligation.depth() >= self.options.max_obligation_depth {
                            debug!(depth = obligation.depth(), "obligation depth limit reached");
                            continue;
                        }
                    }
                    for lifted in blocking_clauses {
                        let obligation = Obligation::new(candidate.clone(), lifted.clause, lifted.weakenings);
                        let depth = obligation.depth();
                        if self.pool.add_obligation(obligation) {
                            self.stats.obligations_created += 1;
                            debug!(k, depth, cause = %candidate, "queued obligation");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_in_the_past_is_exceeded() {
        assert!(!deadline_exceeded(None));
        assert!(deadline_exceeded(Some(Instant::now())));
        assert!(!deadline_exceeded(Some(Instant::now() + Duration::from_secs(60))));
    }

    #[test]
    fn status_constants() {
        assert!(AlgorithmStatus::SOUND_AND_PRECISE.sound);
        assert!(AlgorithmStatus::UNSOUND_AND_PRECISE.precise);
        assert!(!AlgorithmStatus::UNSOUND_AND_IMPRECISE.precise);
    }
}
