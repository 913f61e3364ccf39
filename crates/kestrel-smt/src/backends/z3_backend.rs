use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::solver::{FrameId, Model, ModelValue, SatResult, SessionConfig, SmtSolver, SolverFactory};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Sort mismatch for variable {0}")]
    SortMismatch(String),
    #[error("pop on an empty frame stack")]
    EmptyStack,
}

/// Opens Z3 sessions.
///
/// Z3 has no interpolation API, so interpolating configs are honored as
/// plain ones and report the capability as missing. Unsat cores are
/// computed through one assumption literal per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Z3Factory {
    pub timeout_secs: u64,
}

impl Z3Factory {
    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl SolverFactory for Z3Factory {
    type Solver = Z3Session;

    fn open(&self, config: SessionConfig) -> Result<Z3Session, Z3Error> {
        Ok(Z3Session::new(config, self.timeout_secs))
    }
}

pub struct Z3Session {
    solver: z3::Solver,
    track_frames: bool,
    sorts: BTreeMap<String, SmtSort>,
    int_vars: HashMap<String, z3::ast::Int>,
    bool_vars: HashMap<String, z3::ast::Bool>,
    frame_literals: Vec<z3::ast::Bool>,
    _params: Option<z3::Params>,
}

impl Z3Session {
    pub fn new(config: SessionConfig, timeout_secs: u64) -> Self {
        let solver = z3::Solver::new();
        let params = (timeout_secs > 0).then(|| {
            let mut params = z3::Params::new();
            let timeout_ms = timeout_secs.saturating_mul(1000).min(u32::MAX as u64) as u32;
            params.set_u32("timeout", timeout_ms);
            solver.set_params(&params);
            params
        });
        Self {
            solver,
            track_frames: config.unsat_core,
            sorts: BTreeMap::new(),
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            frame_literals: Vec::new(),
            _params: params,
        }
    }

    fn declare_vars(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let mut inferred = BTreeMap::new();
        term.infer_sorts(&mut inferred);
        for (name, sort) in inferred {
            match self.sorts.get(&name) {
                Some(existing) if *existing != sort => return Err(Z3Error::SortMismatch(name)),
                Some(_) => {}
                None => {
                    match sort {
                        SmtSort::Int => {
                            let v = z3::ast::Int::new_const(name.as_str());
                            self.int_vars.insert(name.clone(), v);
                        }
                        SmtSort::Bool => {
                            let v = z3::ast::Bool::new_const(name.as_str());
                            self.bool_vars.insert(name.clone(), v);
                        }
                    }
                    self.sorts.insert(name, sort);
                }
            }
        }
        Ok(())
    }

    fn translate_term(&self, term: &SmtTerm) -> Result<Z3Term, Z3Error> {
        use z3::ast::{Bool, Int};
        let translated = match term {
            SmtTerm::Var(name) => match (self.int_vars.get(name), self.bool_vars.get(name)) {
                (Some(v), _) => Z3Term::Int(v.clone()),
                (None, Some(v)) => Z3Term::Bool(v.clone()),
                (None, None) => return Err(Z3Error::UnknownVariable(name.clone())),
            },
            SmtTerm::IntLit(n) => Z3Term::Int(Int::from_i64(*n)),
            SmtTerm::BoolLit(b) => Z3Term::Bool(Bool::from_bool(*b)),
            SmtTerm::Add(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Int(&l + &r))?,
            SmtTerm::Sub(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Int(&l - &r))?,
            SmtTerm::Mul(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Int(&l * &r))?,
            SmtTerm::Lt(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Bool(l.lt(&r)))?,
            SmtTerm::Le(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Bool(l.le(&r)))?,
            SmtTerm::Gt(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Bool(l.gt(&r)))?,
            SmtTerm::Ge(l, r) => self.ints(l, r).map(|(l, r)| Z3Term::Bool(l.ge(&r)))?,
            SmtTerm::Eq(l, r) => match (self.translate_term(l)?, self.translate_term(r)?) {
                (Z3Term::Int(l), Z3Term::Int(r)) => Z3Term::Bool(l.eq(&r)),
                (Z3Term::Bool(l), Z3Term::Bool(r)) => Z3Term::Bool(l.eq(&r)),
                _ => return Err(Z3Error::Internal(format!("sort mismatch in {term}"))),
            },
            SmtTerm::And(terms) => {
                let bools = self.translate_bools(terms)?;
                Z3Term::Bool(Bool::and(&bools.iter().collect::<Vec<_>>()))
            }
            SmtTerm::Or(terms) => {
                let bools = self.translate_bools(terms)?;
                Z3Term::Bool(Bool::or(&bools.iter().collect::<Vec<_>>()))
            }
            SmtTerm::Not(inner) => Z3Term::Bool(self.translate_term(inner)?.into_bool()?.not()),
            SmtTerm::Implies(l, r) => {
                let l = self.translate_term(l)?.into_bool()?;
                Z3Term::Bool(l.implies(&self.translate_term(r)?.into_bool()?))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_term(cond)?.into_bool()?;
                match (self.translate_term(then)?, self.translate_term(els)?) {
                    (Z3Term::Int(t), Z3Term::Int(e)) => Z3Term::Int(c.ite(&t, &e)),
                    (Z3Term::Bool(t), Z3Term::Bool(e)) => Z3Term::Bool(c.ite(&t, &e)),
                    _ => return Err(Z3Error::Internal(format!("sort mismatch in {term}"))),
                }
            }
        };
        Ok(translated)
    }

    fn ints(&self, lhs: &SmtTerm, rhs: &SmtTerm) -> Result<(z3::ast::Int, z3::ast::Int), Z3Error> {
        Ok((
            self.translate_term(lhs)?.into_int()?,
            self.translate_term(rhs)?.into_int()?,
        ))
    }

    fn translate_bools(&self, terms: &[SmtTerm]) -> Result<Vec<z3::ast::Bool>, Z3Error> {
        terms
            .iter()
            .map(|t| self.translate_term(t).and_then(Z3Term::into_bool))
            .collect()
    }

    fn map_result(result: Z3SatResult) -> SatResult {
        match result {
            Z3SatResult::Sat => SatResult::Sat,
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => SatResult::Unknown("Z3 returned unknown".into()),
        }
    }
}

enum Z3Term {
    Int(z3::ast::Int),
    Bool(z3::ast::Bool),
}

impl Z3Term {
    fn into_int(self) -> Result<z3::ast::Int, Z3Error> {
        match self {
            Z3Term::Int(i) => Ok(i),
            Z3Term::Bool(_) => Err(Z3Error::Internal("expected an Int term".into())),
        }
    }

    fn into_bool(self) -> Result<z3::ast::Bool, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            Z3Term::Int(_) => Err(Z3Error::Internal("expected a Bool term".into())),
        }
    }
}

impl SmtSolver for Z3Session {
    type Error = Z3Error;

    fn push(&mut self, term: &SmtTerm) -> Result<FrameId, Z3Error> {
        self.declare_vars(term)?;
        let formula = self.translate_term(term)?.into_bool()?;
        let frame = FrameId(self.frame_literals.len());
        self.solver.push();
        let literal = z3::ast::Bool::new_const(format!("__frame!{}", frame.0));
        if self.track_frames {
            self.solver.assert(&literal.implies(&formula));
        } else {
            self.solver.assert(&formula);
        }
        self.frame_literals.push(literal);
        Ok(frame)
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        if self.frame_literals.pop().is_none() {
            return Err(Z3Error::EmptyStack);
        }
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        let result = if self.track_frames {
            self.solver.check_assumptions(&self.frame_literals)
        } else {
            self.solver.check()
        };
        Ok(Self::map_result(result))
    }

    fn model(&mut self) -> Result<Option<Model>, Z3Error> {
        let Some(z3_model) = self.solver.get_model() else {
            return Ok(None);
        };
        let mut values = HashMap::new();
        for (name, v) in &self.int_vars {
            if let Some(n) = z3_model.eval::<z3::ast::Int>(v, true).and_then(|val| val.as_i64()) {
                values.insert(name.clone(), ModelValue::Int(n));
            }
        }
        for (name, v) in &self.bool_vars {
            if let Some(b) = z3_model.eval::<z3::ast::Bool>(v, true).and_then(|val| val.as_bool()) {
                values.insert(name.clone(), ModelValue::Bool(b));
            }
        }
        Ok(Some(Model { values }))
    }

    fn supports_unsat_core(&self) -> bool {
        self.track_frames
    }

    fn unsat_core(&mut self) -> Result<Option<Vec<FrameId>>, Z3Error> {
        if !self.track_frames {
            return Ok(None);
        }
        let core = self.solver.get_unsat_core();
        let frames = self
            .frame_literals
            .iter()
            .enumerate()
            .filter(|(_, lit)| core.contains(lit))
            .map(|(i, _)| FrameId(i))
            .collect();
        Ok(Some(frames))
    }
}
