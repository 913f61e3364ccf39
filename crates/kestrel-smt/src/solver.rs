use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

/// Errors surfaced by solver sessions to the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("solver failure: {0}")]
    Failure(String),
    #[error("solver returned unknown: {0}")]
    Unknown(String),
    #[error("interpolation is not supported by this solver session")]
    InterpolationUnsupported,
    #[error("unsat cores are not supported by this solver session")]
    UnsatCoreUnsupported,
    #[error("no model available; the last check was not satisfiable")]
    NoModel,
    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl SolverError {
    /// Whether the error comes from the backend rather than from the analysis.
    ///
    /// Only backend errors are worth a rebuild of the session. An `unknown`
    /// answer is inconclusive, not broken, and keeps the session as is.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, SolverError::Failure(_))
    }
}

/// Capabilities requested when a solver session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionConfig {
    pub interpolation: bool,
    pub unsat_core: bool,
}

impl SessionConfig {
    pub const PLAIN: SessionConfig = SessionConfig {
        interpolation: false,
        unsat_core: false,
    };

    pub fn with_interpolation(mut self, enabled: bool) -> Self {
        self.interpolation = enabled;
        self
    }

    pub fn with_unsat_core(mut self, enabled: bool) -> Self {
        self.unsat_core = enabled;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::PLAIN
    }
}

/// Position of an asserted formula on the solver stack.
///
/// Frame 0 is the first formula pushed. Interpolation partitions and unsat
/// cores are expressed in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub usize);

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    pub values: HashMap<String, ModelValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelValue {
    Int(i64),
    Bool(bool),
}

impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Int(n) => write!(f, "{n}"),
            ModelValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl Model {
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ModelValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Evaluate `term` under this model.
    ///
    /// Unassigned variables are completed with `0` / `false`. Returns `None`
    /// for ill-sorted terms or arithmetic overflow.
    pub fn evaluate(&self, term: &SmtTerm) -> Option<ModelValue> {
        use ModelValue::{Bool, Int};
        let int = |t: &SmtTerm| match self.evaluate(t)? {
            Int(n) => Some(n),
            Bool(_) => None,
        };
        let boolean = |t: &SmtTerm| match self.evaluate(t)? {
            Bool(b) => Some(b),
            Int(_) => None,
        };
        Some(match term {
            SmtTerm::Var(name) => self.values.get(name).copied().unwrap_or(Int(0)),
            SmtTerm::IntLit(n) => Int(*n),
            SmtTerm::BoolLit(b) => Bool(*b),
            SmtTerm::Add(l, r) => Int(int(l)?.checked_add(int(r)?)?),
            SmtTerm::Sub(l, r) => Int(int(l)?.checked_sub(int(r)?)?),
            SmtTerm::Mul(l, r) => Int(int(l)?.checked_mul(int(r)?)?),
            SmtTerm::Eq(l, r) => {
                let (l, r) = (self.evaluate(l)?, self.evaluate(r)?);
                match (l, r) {
                    (Int(a), Int(b)) => Bool(a == b),
                    (Bool(a), Bool(b)) => Bool(a == b),
                    // An unassigned boolean variable completes to `false`.
                    (Bool(a), Int(0)) | (Int(0), Bool(a)) => Bool(!a),
                    _ => return None,
                }
            }
            SmtTerm::Lt(l, r) => Bool(int(l)? < int(r)?),
            SmtTerm::Le(l, r) => Bool(int(l)? <= int(r)?),
            SmtTerm::Gt(l, r) => Bool(int(l)? > int(r)?),
            SmtTerm::Ge(l, r) => Bool(int(l)? >= int(r)?),
            SmtTerm::And(parts) => {
                let mut all = true;
                for p in parts {
                    all &= self.evaluate_bool(p)?;
                }
                Bool(all)
            }
            SmtTerm::Or(parts) => {
                let mut any = false;
                for p in parts {
                    any |= self.evaluate_bool(p)?;
                }
                Bool(any)
            }
            SmtTerm::Not(inner) => Bool(!self.evaluate_bool(inner)?),
            SmtTerm::Implies(l, r) => Bool(!boolean(l)? || boolean(r)?),
            SmtTerm::Ite(c, t, e) => {
                if boolean(c)? {
                    self.evaluate(t)?
                } else {
                    self.evaluate(e)?
                }
            }
        })
    }

    /// Evaluate a formula; unassigned variables in boolean position are `false`.
    pub fn evaluate_bool(&self, term: &SmtTerm) -> Option<bool> {
        match term {
            SmtTerm::Var(name) => match self.values.get(name) {
                Some(ModelValue::Bool(b)) => Some(*b),
                Some(ModelValue::Int(_)) => None,
                None => Some(false),
            },
            other => match self.evaluate(other)? {
                ModelValue::Bool(b) => Some(b),
                ModelValue::Int(_) => None,
            },
        }
    }
}

impl FromIterator<(String, ModelValue)> for Model {
    fn from_iter<T: IntoIterator<Item = (String, ModelValue)>>(iter: T) -> Self {
        Model {
            values: iter.into_iter().collect(),
        }
    }
}

/// Abstract incremental SMT solver session.
///
/// Every `push` opens a new backtracking point and asserts one formula in it,
/// so the stack depth always equals the number of asserted frames.
pub trait SmtSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a backtracking point and assert `term` in it.
    fn push(&mut self, term: &SmtTerm) -> Result<FrameId, Self::Error>;

    /// Remove the most recent frame.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability of the conjunction of all frames.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Model of the previous satisfiable check.
    fn model(&mut self) -> Result<Option<Model>, Self::Error>;

    /// Whether this session can compute interpolants.
    fn supports_interpolation(&self) -> bool {
        false
    }

    /// Craig interpolant for the partition `A = frames`, `B = rest`, after an
    /// unsatisfiable check. `None` when unsupported.
    fn interpolant(&mut self, _frames: &[FrameId]) -> Result<Option<SmtTerm>, Self::Error> {
        Ok(None)
    }

    /// Whether this session can report unsat cores over frames.
    fn supports_unsat_core(&self) -> bool {
        false
    }

    /// Frames participating in the unsat core of the previous check.
    fn unsat_core(&mut self) -> Result<Option<Vec<FrameId>>, Self::Error> {
        Ok(None)
    }
}

/// Opens fresh solver sessions.
pub trait SolverFactory {
    type Solver: SmtSolver;

    fn open(
        &self,
        config: SessionConfig,
    ) -> Result<Self::Solver, <Self::Solver as SmtSolver>::Error>;
}
