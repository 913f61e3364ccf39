//! A solver session that survives backend failures.
//!
//! [`ResilientProver`] owns one logical assertion stack. Every pushed formula
//! is mirrored on a shadow stack; when the backend fails (or turns out not to
//! support a requested capability) the session is closed, a less demanding
//! one is opened, the shadow stack is replayed in push order and the failed
//! operation is retried.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::backends::smtlib_printer::script;
use crate::shutdown::ShutdownNotifier;
use crate::solver::{FrameId, Model, SatResult, SessionConfig, SmtSolver, SolverError, SolverFactory};
use crate::terms::SmtTerm;

/// Failed attempts tolerated for one operation before the error is surfaced.
const MAX_RECOVERY_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProverStatistics {
    pub pushes: usize,
    pub pops: usize,
    pub checks: usize,
    pub fallbacks: usize,
    pub replays: usize,
    pub solver_time: Duration,
}

impl ProverStatistics {
    /// Frames pushed and not yet popped.
    pub fn outstanding(&self) -> isize {
        self.pushes as isize - self.pops as isize
    }
}

fn backend_failure(err: impl fmt::Display) -> SolverError {
    SolverError::Failure(err.to_string())
}

pub struct ResilientProver<F: SolverFactory> {
    factory: F,
    config: SessionConfig,
    session: Option<F::Solver>,
    stack: Vec<SmtTerm>,
    needs_rebuild: bool,
    shutdown: ShutdownNotifier,
    stats: ProverStatistics,
}

impl<F: SolverFactory> ResilientProver<F> {
    /// Open a session with the requested capabilities.
    ///
    /// A factory that cannot honor `config` is retried with a plain config.
    pub fn new(
        factory: F,
        config: SessionConfig,
        shutdown: ShutdownNotifier,
    ) -> Result<Self, SolverError> {
        let mut prover = Self {
            factory,
            config,
            session: None,
            stack: Vec::new(),
            needs_rebuild: true,
            shutdown,
            stats: ProverStatistics::default(),
        };
        prover.recover(|_, _| Ok(()), "open")?;
        Ok(prover)
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn supports_interpolation(&self) -> bool {
        self.config.interpolation
    }

    pub fn supports_unsat_core(&self) -> bool {
        self.config.unsat_core
    }

    /// Number of frames on the logical stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Formulas on the logical stack, bottom first.
    pub fn frames(&self) -> &[SmtTerm] {
        &self.stack
    }

    pub fn statistics(&self) -> &ProverStatistics {
        &self.stats
    }

    pub fn shutdown_notifier(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    /// Open a scope; frames pushed through it are popped when it is dropped.
    pub fn scope(&mut self) -> ProverScope<'_, F> {
        let base = self.depth();
        ProverScope { prover: self, base }
    }

    pub fn push(&mut self, term: SmtTerm) -> Result<FrameId, SolverError> {
        self.shutdown.check()?;
        trace!(depth = self.stack.len(), formula = %term, "push");
        if !self.needs_rebuild {
            if let Some(session) = self.session.as_mut() {
                if let Err(err) = session.push(&term) {
                    warn!(error = %err, "solver push failed; session will be rebuilt");
                    self.needs_rebuild = true;
                }
            }
        }
        self.stack.push(term);
        self.stats.pushes += 1;
        Ok(FrameId(self.stack.len() - 1))
    }

    /// Remove the most recent frame.
    ///
    /// Never fails: a backend error only schedules a rebuild from the shadow
    /// stack, so cleanup paths can always restore balance.
    pub fn pop(&mut self) {
        if self.stack.pop().is_none() {
            warn!("pop on an empty prover stack ignored");
            return;
        }
        self.stats.pops += 1;
        if !self.needs_rebuild {
            if let Some(session) = self.session.as_mut() {
                if let Err(err) = session.pop() {
                    warn!(error = %err, "solver pop failed; session will be rebuilt");
                    self.needs_rebuild = true;
                }
            }
        }
    }

    pub fn is_unsat(&mut self) -> Result<bool, SolverError> {
        let start = Instant::now();
        self.stats.checks += 1;
        trace!(query = %script(&self.stack), "check query");
        let result = self.recover(
            |session, _| match session.check_sat().map_err(backend_failure)? {
                SatResult::Unsat => Ok(true),
                SatResult::Sat => Ok(false),
                SatResult::Unknown(reason) => Err(SolverError::Unknown(reason)),
            },
            "check",
        );
        self.stats.solver_time += start.elapsed();
        trace!(depth = self.stack.len(), unsat = ?result, "check");
        result
    }

    /// Model of the previous satisfiable check.
    pub fn model(&mut self) -> Result<Model, SolverError> {
        self.recover(
            |session, rebuilt| {
                if rebuilt {
                    session.check_sat().map_err(backend_failure)?;
                }
                session
                    .model()
                    .map_err(backend_failure)?
                    .ok_or(SolverError::NoModel)
            },
            "model",
        )
    }

    /// Interpolant for the partition `A = frames`, `B = every other frame`.
    pub fn interpolant(&mut self, frames: &[FrameId]) -> Result<SmtTerm, SolverError> {
        if !self.config.interpolation {
            return Err(SolverError::InterpolationUnsupported);
        }
        let interpolant = self.recover(
            |session, rebuilt| {
                if !session.supports_interpolation() {
                    return Err(SolverError::InterpolationUnsupported);
                }
                if rebuilt {
                    session.check_sat().map_err(backend_failure)?;
                }
                session
                    .interpolant(frames)
                    .map_err(backend_failure)?
                    .ok_or_else(|| SolverError::Failure("interpolation not available".to_string()))
            },
            "interpolant",
        );
        match interpolant {
            Err(SolverError::InterpolationUnsupported) if self.config.interpolation => {
                warn!("session cannot interpolate; continuing with a plain session");
                self.config.interpolation = false;
                self.stats.fallbacks += 1;
                self.needs_rebuild = true;
                Err(SolverError::InterpolationUnsupported)
            }
            Err(_) if !self.config.interpolation => Err(SolverError::InterpolationUnsupported),
            other => other,
        }
    }

    /// Frames in the unsat core of the previous unsatisfiable check.
    pub fn unsat_core(&mut self) -> Result<Vec<FrameId>, SolverError> {
        if !self.config.unsat_core {
            return Err(SolverError::UnsatCoreUnsupported);
        }
        let core = self.recover(
            |session, rebuilt| {
                if !session.supports_unsat_core() {
                    return Err(SolverError::UnsatCoreUnsupported);
                }
                if rebuilt {
                    session.check_sat().map_err(backend_failure)?;
                }
                session
                    .unsat_core()
                    .map_err(backend_failure)?
                    .ok_or_else(|| SolverError::Failure("unsat core not available".to_string()))
            },
            "unsat-core",
        );
        match core {
            Err(SolverError::UnsatCoreUnsupported) if self.config.unsat_core => {
                warn!("session cannot produce unsat cores; continuing with a plain session");
                self.config.unsat_core = false;
                self.stats.fallbacks += 1;
                self.needs_rebuild = true;
                Err(SolverError::UnsatCoreUnsupported)
            }
            Err(_) if !self.config.unsat_core => Err(SolverError::UnsatCoreUnsupported),
            other => other,
        }
    }

    /// Drop the most demanding capability still enabled.
    fn downgrade(&mut self) {
        if self.config.interpolation {
            self.config.interpolation = false;
        } else if self.config.unsat_core {
            self.config.unsat_core = false;
        }
        self.stats.fallbacks += 1;
    }

    fn rebuild(&mut self) -> Result<(), SolverError> {
        self.session = None;
        let mut session = self.factory.open(self.config).map_err(backend_failure)?;
        for term in &self.stack {
            session.push(term).map_err(backend_failure)?;
        }
        if !self.stack.is_empty() {
            self.stats.replays += 1;
            debug!(frames = self.stack.len(), config = ?self.config, "replayed prover stack");
        }
        self.session = Some(session);
        self.needs_rebuild = false;
        Ok(())
    }

    fn recover<T>(
        &mut self,
        mut op: impl FnMut(&mut F::Solver, bool) -> Result<T, SolverError>,
        operation: &'static str,
    ) -> Result<T, SolverError> {
        let mut attempts = 0;
        loop {
            self.shutdown.check()?;
            let rebuilt = self.needs_rebuild || self.session.is_none();
            let outcome = if rebuilt { self.rebuild() } else { Ok(()) }.and_then(|()| {
                let session = self
                    .session
                    .as_mut()
                    .ok_or_else(|| SolverError::Failure("no open session".to_string()))?;
                op(session, rebuilt)
            });
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_backend_failure() && attempts < MAX_RECOVERY_ATTEMPTS => {
                    attempts += 1;
                    let previous = self.config;
                    self.downgrade();
                    warn!(
                        operation,
                        attempt = attempts,
                        error = %err,
                        from = ?previous,
                        to = ?self.config,
                        "solver failure; reopening session"
                    );
                    self.needs_rebuild = true;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<F: SolverFactory> fmt::Debug for ResilientProver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientProver")
            .field("config", &self.config)
            .field("depth", &self.stack.len())
            .field("needs_rebuild", &self.needs_rebuild)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Scoped access to a [`ResilientProver`].
///
/// Dropping the scope pops every frame pushed since it was opened, on the
/// success path as well as on early returns through `?`.
pub struct ProverScope<'a, F: SolverFactory> {
    prover: &'a mut ResilientProver<F>,
    base: usize,
}

impl<F: SolverFactory> ProverScope<'_, F> {
    /// Frames pushed in this scope and not yet popped.
    pub fn pushed(&self) -> usize {
        self.prover.depth().saturating_sub(self.base)
    }

    /// Pop one frame of this scope; frames below the scope are never touched.
    pub fn pop(&mut self) {
        if self.pushed() > 0 {
            self.prover.pop();
        }
    }
}

impl<F: SolverFactory> Deref for ProverScope<'_, F> {
    type Target = ResilientProver<F>;

    fn deref(&self) -> &Self::Target {
        self.prover
    }
}

impl<F: SolverFactory> DerefMut for ProverScope<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.prover
    }
}

impl<F: SolverFactory> Drop for ProverScope<'_, F> {
    fn drop(&mut self) {
        while self.prover.depth() > self.base {
            self.prover.pop();
        }
    }
}
