use serde::{Deserialize, Serialize};

use crate::lifting::LiftingStrategy;

/// How long the proof loop lets the invariant generator run alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeadStartMode {
    #[default]
    None,
    /// Until the generator cannot refine further.
    UntilExhausted,
    /// Until the generator reports it is likely to run for a long time.
    UntilLikelyLongRunning,
}

/// Options of a BMC / k-induction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BmcOptions {
    pub induction: bool,
    pub bounding_assertions: bool,
    pub lifting: LiftingStrategy,
    pub split_numeral_equalities: bool,
    pub property_directed: bool,
    pub abstract_proved_invariants: bool,
    /// Obligations at this depth produce no further obligations.
    pub max_obligation_depth: usize,
    pub interpolation: bool,
    pub unsat_cores: bool,
    pub head_start: HeadStartMode,
    pub initial_bound: usize,
    pub bound_increment: usize,
    pub max_bound: Option<usize>,
    /// Overall time budget in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for BmcOptions {
    fn default() -> Self {
        Self {
            induction: true,
            bounding_assertions: true,
            lifting: LiftingStrategy::UnsatBased,
            split_numeral_equalities: true,
            property_directed: false,
            abstract_proved_invariants: false,
            max_obligation_depth: 8,
            interpolation: false,
            unsat_cores: true,
            head_start: HeadStartMode::None,
            initial_bound: 1,
            bound_increment: 1,
            max_bound: Some(10),
            timeout_secs: 0,
        }
    }
}

impl BmcOptions {
    /// The bound after `bound`, or `None` once the schedule is exhausted.
    pub fn next_bound(&self, bound: usize) -> Option<usize> {
        let next = bound.checked_add(self.bound_increment.max(1))?;
        match self.max_bound {
            Some(max) if next > max => None,
            _ => Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options: BmcOptions =
            serde_json::from_str(r#"{"lifting": "abstraction-based", "max_bound": 3}"#).expect("parse options");
        assert_eq!(options.lifting, LiftingStrategy::AbstractionBased);
        assert_eq!(options.max_bound, Some(3));
        assert!(options.induction);
        assert_eq!(options.max_obligation_depth, 8);
        assert_eq!(options.head_start, HeadStartMode::None);
    }

    #[test]
    fn bound_schedule_stops_at_max() {
        let options = BmcOptions {
            bound_increment: 2,
            max_bound: Some(5),
            ..BmcOptions::default()
        };
        assert_eq!(options.next_bound(1), Some(3));
        assert_eq!(options.next_bound(3), Some(5));
        assert_eq!(options.next_bound(5), None);
        let unbounded = BmcOptions {
            max_bound: None,
            ..BmcOptions::default()
        };
        assert_eq!(unbounded.next_bound(100), Some(101));
    }
}
