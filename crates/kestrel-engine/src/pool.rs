//! The set of candidates still waiting for a verdict.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::debug;

use crate::candidate::CandidateInvariant;
use crate::obligation::Obligation;

/// Pending root candidates, in supply order, plus the obligations derived
/// from them, shallowest first.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    roots: IndexSet<CandidateInvariant>,
    obligations: BTreeSet<Arc<Obligation>>,
}

fn descends_from(obligation: &Obligation, ancestor: &CandidateInvariant) -> bool {
    let mut current = obligation.cause();
    loop {
        if current == ancestor {
            return true;
        }
        match current {
            CandidateInvariant::Obligation(parent) => current = parent.cause(),
            _ => return false,
        }
    }
}

impl CandidatePool {
    pub fn new(candidates: impl IntoIterator<Item = CandidateInvariant>) -> Self {
        let mut pool = Self::default();
        for candidate in candidates {
            pool.add(candidate);
        }
        pool
    }

    /// Pool holding only the "no target reachable" candidate.
    pub fn target_only() -> Self {
        Self::new([CandidateInvariant::TargetLocation])
    }

    /// Add a candidate; obligations are queued by depth.
    pub fn add(&mut self, candidate: CandidateInvariant) -> bool {
        match candidate {
            CandidateInvariant::Obligation(o) => self.obligations.insert(o),
            other => self.roots.insert(other),
        }
    }

    /// Queue an obligation unless it is already queued or its root cause has
    /// been resolved.
    pub fn add_obligation(&mut self, obligation: Obligation) -> bool {
        if !self.roots.contains(obligation.root_cause()) {
            return false;
        }
        self.obligations.insert(Arc::new(obligation))
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.obligations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty() && self.obligations.is_empty()
    }

    pub fn contains(&self, candidate: &CandidateInvariant) -> bool {
        match candidate {
            CandidateInvariant::Obligation(o) => self.obligations.contains(o),
            other => self.roots.contains(other),
        }
    }

    pub fn roots(&self) -> impl Iterator<Item = &CandidateInvariant> {
        self.roots.iter()
    }

    pub fn obligations(&self) -> impl Iterator<Item = &Arc<Obligation>> {
        self.obligations.iter()
    }

    /// Roots in supply order, then obligations shallowest first.
    pub fn bmc_order(&self) -> Vec<CandidateInvariant> {
        self.roots
            .iter()
            .cloned()
            .chain(self.obligations.iter().cloned().map(CandidateInvariant::Obligation))
            .collect()
    }

    /// Obligations shallowest first, then roots.
    pub fn induction_order(&self) -> Vec<CandidateInvariant> {
        self.obligations
            .iter()
            .cloned()
            .map(CandidateInvariant::Obligation)
            .chain(self.roots.iter().cloned())
            .collect()
    }

    /// The candidate was proved; drop it and everything derived from it.
    pub fn confirm(&mut self, candidate: &CandidateInvariant) {
        self.resolve(candidate);
    }

    /// The candidate was disproved.
    ///
    /// An obligation with weakenings left is replaced by its next weakening,
    /// which is returned.
    pub fn refute(&mut self, candidate: &CandidateInvariant) -> Option<CandidateInvariant> {
        self.resolve(candidate);
        let weakened = candidate.as_obligation()?.weaken()?;
        if !self.roots.contains(weakened.root_cause()) {
            return None;
        }
        debug!(obligation = %weakened, "replacing refuted obligation by its weakening");
        let weakened = Arc::new(weakened);
        self.obligations.insert(weakened.clone());
        Some(CandidateInvariant::Obligation(weakened))
    }

    /// Swap an obligation for a refined version of it.
    pub fn replace_obligation(&mut self, old: &Arc<Obligation>, refined: Obligation) -> CandidateInvariant {
        self.obligations.remove(old);
        let refined = Arc::new(refined);
        self.obligations.insert(refined.clone());
        CandidateInvariant::Obligation(refined)
    }

    fn resolve(&mut self, candidate: &CandidateInvariant) {
        match candidate {
            CandidateInvariant::Obligation(o) => {
                self.obligations.remove(o);
            }
            other => {
                self.roots.shift_remove(other);
            }
        }
        let before = self.obligations.len();
        self.obligations.retain(|o| !descends_from(o, candidate));
        let dropped = before - self.obligations.len();
        if dropped > 0 {
            debug!(candidate = %candidate, dropped, "dropped obligations of resolved candidate");
        }
    }
}
