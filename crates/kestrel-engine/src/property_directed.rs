//! Property-directed strengthening of CTI-blocking obligations.
//!
//! A blocking clause `!(l1 & ... & ln)` is replaced by the clause over the
//! shortest prefix of its literals that no reached state violates. Literals
//! mentioning more variables come first. The original clause is kept as the
//! first weakening of the strengthened obligation.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use kestrel_smt::prover::ResilientProver;
use kestrel_smt::solver::SolverFactory;
use kestrel_smt::terms::SmtTerm;
use tracing::debug;

use crate::candidate::{CandidateInvariant, SymbolicCandidate};
use crate::error::EngineError;
use crate::obligation::Obligation;
use crate::reached::{ReachedSet, StateId};

/// What bounded model checking has shown about one clause so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BmcResult {
    safe_states: BTreeSet<StateId>,
    is_unsafe: bool,
}

impl BmcResult {
    pub fn is_unsafe(&self) -> bool {
        self.is_unsafe
    }

    pub fn safe_states(&self) -> &BTreeSet<StateId> {
        &self.safe_states
    }

    fn mark_unsafe(&mut self) {
        self.is_unsafe = true;
        self.safe_states.clear();
    }
}

#[derive(Debug, Default)]
pub struct PropertyDirectedRefiner {
    results: HashMap<SymbolicCandidate, BmcResult>,
}

impl PropertyDirectedRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self, clause: &SymbolicCandidate) -> Option<&BmcResult> {
        self.results.get(clause)
    }

    /// Strengthen `obligation` if a proper prefix of its literals already
    /// blocks every reached state.
    ///
    /// Returns `None` when the clause is not a blocked CTI, when the clause
    /// itself is violated, or when all literals are needed.
    pub fn refine<F: SolverFactory>(
        &mut self,
        prover: &mut ResilientProver<F>,
        reached: &ReachedSet,
        invariants: &SmtTerm,
        obligation: &Obligation,
    ) -> Result<Option<Obligation>, EngineError> {
        let clause = obligation.blocking_clause();
        let mut literals = clause.formula().clone().negate().conjuncts();
        if literals.len() < 2 {
            return Ok(None);
        }
        if !self.is_bmc_safe(prover, reached, invariants, clause)? {
            debug!(clause = %clause, "blocking clause is violated; nothing to strengthen");
            return Ok(None);
        }
        literals.sort_by_key(|l| Reverse(l.variables().len()));

        for len in 1..literals.len() {
            let prefix = SmtTerm::conjunction(literals[..len].iter().cloned());
            let candidate = clause.with_formula(prefix.negate());
            if self.is_bmc_safe(prover, reached, invariants, &candidate)? {
                debug!(
                    depth = obligation.depth(),
                    from = %clause,
                    to = %candidate,
                    "property-directed strengthening"
                );
                let mut weakenings = vec![clause.clone()];
                weakenings.extend(obligation.weakenings().iter().cloned());
                return Ok(Some(Obligation::new(
                    obligation.cause().clone(),
                    candidate,
                    weakenings,
                )));
            }
        }
        Ok(None)
    }

    /// Whether no reached state the clause applies to violates it.
    ///
    /// States shown safe earlier are not queried again; an unsafe verdict is
    /// final.
    fn is_bmc_safe<F: SolverFactory>(
        &mut self,
        prover: &mut ResilientProver<F>,
        reached: &ReachedSet,
        invariants: &SmtTerm,
        clause: &SymbolicCandidate,
    ) -> Result<bool, EngineError> {
        let result = self.results.entry(clause.clone()).or_default();
        if result.is_unsafe {
            return Ok(false);
        }
        let pending: Vec<_> = reached
            .states()
            .filter(|s| clause.applies_to(s) && !result.safe_states.contains(&s.id))
            .collect();
        if pending.is_empty() {
            return Ok(true);
        }
        let violation = CandidateInvariant::BlockedCti(clause.clone()).violation(pending.iter().copied());
        let mut scope = prover.scope();
        scope.push(invariants.clone())?;
        scope.push(violation)?;
        if scope.is_unsat()? {
            result.safe_states.extend(pending.iter().map(|s| s.id));
            Ok(true)
        } else {
            result.mark_unsafe();
            Ok(false)
        }
    }
}
