use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Counters of one BMC run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BmcStatistics {
    pub iterations: usize,
    pub bmc_checks: usize,
    pub roots_refuted: usize,
    pub bounding_checks: usize,
    pub induction_checks: usize,
    pub induction_successes: usize,
    pub induction_failures: usize,
    pub ctis: usize,
    pub obligations_created: usize,
    pub obligations_confirmed: usize,
    pub weakenings_used: usize,
    pub property_directed_refinements: usize,
    pub abstracted_invariants: usize,
    pub solver_time: Duration,
}

impl fmt::Display for BmcStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "iterations:                  {}", self.iterations)?;
        writeln!(f, "BMC checks:                  {}", self.bmc_checks)?;
        writeln!(f, "candidates refuted by BMC:   {}", self.roots_refuted)?;
        writeln!(f, "bounding-assertion checks:   {}", self.bounding_checks)?;
        writeln!(
            f,
            "induction checks:            {} ({} proved, {} failed)",
            self.induction_checks, self.induction_successes, self.induction_failures
        )?;
        writeln!(f, "CTIs:                        {}", self.ctis)?;
        writeln!(
            f,
            "obligations:                 {} created, {} confirmed, {} weakened",
            self.obligations_created, self.obligations_confirmed, self.weakenings_used
        )?;
        writeln!(f, "property-directed refines:   {}", self.property_directed_refinements)?;
        writeln!(f, "abstracted invariants:       {}", self.abstracted_invariants)?;
        write!(f, "solver time:                 {:.3}s", self.solver_time.as_secs_f64())
    }
}
