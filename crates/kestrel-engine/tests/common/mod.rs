#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kestrel_engine::error::EngineError;
use kestrel_engine::reached::{AbstractState, LocationId, ReachedSet, StateKind};
use kestrel_engine::unroller::{UnrollStatus, Unroller};
use kestrel_smt::shutdown::ShutdownNotifier;
use kestrel_smt::solver::{FrameId, Model, ModelValue, SatResult, SessionConfig, SmtSolver, SolverFactory};
use kestrel_smt::sorts::SmtSort;
use kestrel_smt::ssa::{indexed_name, SsaMap};
use kestrel_smt::terms::SmtTerm;

pub const HEAD: LocationId = LocationId(0);
pub const ERROR: LocationId = LocationId(1);

/// `init; while (true) { if (error) ERROR; x := update(x, inputs); }`
///
/// Every variable and input has SSA index `i` in loop iteration `i`. The
/// step case starts in an unconstrained loop-head state.
#[derive(Debug, Clone)]
pub struct LoopProgram {
    vars: Vec<String>,
    inputs: Vec<String>,
    init: SmtTerm,
    updates: BTreeMap<String, SmtTerm>,
    error: SmtTerm,
    step_case: bool,
}

impl LoopProgram {
    pub fn new(vars: &[&str], init: SmtTerm, updates: Vec<(&str, SmtTerm)>, error: SmtTerm) -> Self {
        Self {
            vars: vars.iter().map(|v| v.to_string()).collect(),
            inputs: Vec::new(),
            init,
            updates: updates.into_iter().map(|(v, t)| (v.to_string(), t)).collect(),
            error,
            step_case: false,
        }
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn step_case(&self) -> Self {
        Self {
            step_case: true,
            ..self.clone()
        }
    }

    fn ssa_at(&self, iteration: usize) -> SsaMap {
        self.vars
            .iter()
            .chain(&self.inputs)
            .map(|v| (v.clone(), iteration))
            .collect()
    }

    fn expand(&self, reached: &mut ReachedSet, head: &AbstractState) {
        let i = head.loop_iteration;
        let error = head.instantiate(&self.error);
        reached.add(
            AbstractState::new(
                ERROR,
                Some(head.id),
                SmtTerm::conjunction(vec![head.path_formula.clone(), error.clone()]),
                head.ssa.clone(),
            )
            .in_iteration(i)
            .as_target(),
        );
        let transition = SmtTerm::conjunction(self.vars.iter().map(|v| {
            let next = SmtTerm::var(indexed_name(v, i + 1));
            let value = match self.updates.get(v) {
                Some(update) => head.instantiate(update),
                None => SmtTerm::var(indexed_name(v, i)),
            };
            SmtTerm::eq(next, value)
        }));
        reached.add(
            AbstractState::new(
                HEAD,
                Some(head.id),
                SmtTerm::conjunction(vec![head.path_formula.clone(), error.negate(), transition]),
                self.ssa_at(i + 1),
            )
            .at_loop_head(i + 1),
        );
    }
}

impl Unroller for LoopProgram {
    fn initial_reached(&self) -> ReachedSet {
        let ssa = self.ssa_at(1);
        let path_formula = if self.step_case {
            SmtTerm::bool(true)
        } else {
            ssa.instantiate(&self.init)
        };
        let mut reached = ReachedSet::new();
        reached.add(
            AbstractState::new(HEAD, None, path_formula, ssa)
                .with_kind(StateKind::Abstraction)
                .at_loop_head(1),
        );
        reached
    }

    fn unroll(&mut self, reached: &mut ReachedSet, bound: usize) -> Result<UnrollStatus, EngineError> {
        let resumable: Vec<_> = reached
            .bound_stopped()
            .filter(|s| s.loop_iteration <= bound)
            .map(|s| s.id)
            .collect();
        for id in resumable {
            if let Some(state) = reached.get_mut(id) {
                state.bound_stopped = false;
            }
            reached.reactivate(id);
        }
        while let Some(id) = reached.pop_waiting() {
            let Some(state) = reached.get(id).cloned() else {
                continue;
            };
            if !state.is_loop_head {
                continue;
            }
            if state.loop_iteration > bound {
                if let Some(stopped) = reached.get_mut(id) {
                    stopped.bound_stopped = true;
                }
                continue;
            }
            self.expand(reached, &state);
        }
        Ok(UnrollStatus::SOUND)
    }

    fn loop_heads(&self) -> BTreeSet<LocationId> {
        BTreeSet::from([HEAD])
    }

    fn is_input(&self, variable: &str) -> bool {
        self.inputs.iter().any(|i| i == variable)
    }
}

/// `x := 0; while (true) { if (error) ERROR; x := x + 1; }`
pub fn increment_program(error: SmtTerm) -> LoopProgram {
    let x = SmtTerm::var("x");
    LoopProgram::new(
        &["x"],
        SmtTerm::eq(x.clone(), SmtTerm::int(0)),
        vec![("x", SmtTerm::add(x, SmtTerm::int(1)))],
        error,
    )
}

/// Error `x < 0`; the target is 1-inductive on its own.
pub fn counter_program() -> LoopProgram {
    increment_program(SmtTerm::lt(SmtTerm::var("x"), SmtTerm::int(0)))
}

/// Error `x == 2`, reached in the third loop iteration.
pub fn buggy_program() -> LoopProgram {
    increment_program(SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(2)))
}

/// Error `x == -2`: unreachable, but not k-inductive for any k without
/// `x >= 0`.
pub fn needs_lemma_program() -> LoopProgram {
    increment_program(SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(-2)))
}

/// `x := 0;` without a back edge or an error location.
///
/// The loop head in iteration 1 is the only state, so unrolling never stops
/// at a bound.
#[derive(Debug, Clone, Default)]
pub struct SingleStateProgram;

impl Unroller for SingleStateProgram {
    fn initial_reached(&self) -> ReachedSet {
        let ssa: SsaMap = [("x".to_string(), 1)].into_iter().collect();
        let path_formula = ssa.instantiate(&SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(0)));
        let mut reached = ReachedSet::new();
        reached.add(
            AbstractState::new(HEAD, None, path_formula, ssa)
                .with_kind(StateKind::Abstraction)
                .at_loop_head(1),
        );
        reached
    }

    fn unroll(&mut self, reached: &mut ReachedSet, _bound: usize) -> Result<UnrollStatus, EngineError> {
        while reached.pop_waiting().is_some() {}
        Ok(UnrollStatus::SOUND)
    }

    fn loop_heads(&self) -> BTreeSet<LocationId> {
        BTreeSet::from([HEAD])
    }
}

/// Decides formulas by enumerating every assignment over a small integer
/// domain.
///
/// Unsat cores are computed by deletion. Interpolation is not supported.
#[derive(Debug, Clone)]
pub struct EnumeratingFactory {
    domain: RangeInclusive<i64>,
    cores: bool,
    interrupt: Option<(usize, ShutdownNotifier)>,
    checks: Arc<AtomicUsize>,
}

impl Default for EnumeratingFactory {
    fn default() -> Self {
        Self {
            domain: -6..=6,
            cores: true,
            interrupt: None,
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EnumeratingFactory {
    /// Integers range over `domain` only.
    pub fn with_domain(domain: RangeInclusive<i64>) -> Self {
        Self {
            domain,
            ..Self::default()
        }
    }

    pub fn without_cores() -> Self {
        Self {
            cores: false,
            ..Self::default()
        }
    }

    /// Request shutdown on `notifier` once `checks` satisfiability checks
    /// have run, counted over every session of this factory.
    pub fn interrupting_after(checks: usize, notifier: ShutdownNotifier) -> Self {
        Self {
            interrupt: Some((checks, notifier)),
            ..Self::default()
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl SolverFactory for EnumeratingFactory {
    type Solver = EnumeratingSolver;

    fn open(&self, config: SessionConfig) -> Result<EnumeratingSolver, Infallible> {
        Ok(EnumeratingSolver {
            factory: self.clone(),
            cores: self.cores && config.unsat_core,
            frames: Vec::new(),
            model: None,
            core: None,
        })
    }
}

pub struct EnumeratingSolver {
    factory: EnumeratingFactory,
    cores: bool,
    frames: Vec<SmtTerm>,
    model: Option<Model>,
    core: Option<Vec<FrameId>>,
}

impl EnumeratingSolver {
    fn find_model(&self, frames: &[&SmtTerm]) -> Option<Model> {
        let mut sorts = BTreeMap::new();
        for frame in frames {
            frame.infer_sorts(&mut sorts);
        }
        let mut model: Model = sorts
            .iter()
            .map(|(name, sort)| (name.clone(), self.first(*sort)))
            .collect();
        let names: Vec<&String> = sorts.keys().collect();
        loop {
            if frames.iter().all(|f| model.evaluate_bool(f) == Some(true)) {
                return Some(model);
            }
            if !self.advance(&names, &mut model) {
                return None;
            }
        }
    }

    fn first(&self, sort: SmtSort) -> ModelValue {
        match sort {
            SmtSort::Bool => ModelValue::Bool(false),
            SmtSort::Int => ModelValue::Int(*self.factory.domain.start()),
        }
    }

    /// Odometer step over `names`; false after the last assignment.
    fn advance(&self, names: &[&String], model: &mut Model) -> bool {
        for name in names {
            let Some(value) = model.values.get_mut(*name) else {
                continue;
            };
            match value {
                ModelValue::Bool(false) => {
                    *value = ModelValue::Bool(true);
                    return true;
                }
                ModelValue::Int(n) if *n < *self.factory.domain.end() => {
                    *n += 1;
                    return true;
                }
                ModelValue::Bool(true) => *value = ModelValue::Bool(false),
                ModelValue::Int(n) => *n = *self.factory.domain.start(),
            }
        }
        false
    }

    fn deletion_core(&self) -> Vec<FrameId> {
        let mut keep: Vec<usize> = (0..self.frames.len()).collect();
        let mut i = 0;
        while i < keep.len() {
            let without: Vec<&SmtTerm> = keep
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, &f)| &self.frames[f])
                .collect();
            if self.find_model(&without).is_none() {
                keep.remove(i);
            } else {
                i += 1;
            }
        }
        keep.into_iter().map(FrameId).collect()
    }
}

impl SmtSolver for EnumeratingSolver {
    type Error = Infallible;

    fn push(&mut self, term: &SmtTerm) -> Result<FrameId, Infallible> {
        self.frames.push(term.clone());
        Ok(FrameId(self.frames.len() - 1))
    }

    fn pop(&mut self) -> Result<(), Infallible> {
        self.frames.pop();
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Infallible> {
        let count = self.factory.checks.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, notifier)) = &self.factory.interrupt {
            if count >= *after {
                notifier.request("interrupted by test");
            }
        }
        let frames: Vec<&SmtTerm> = self.frames.iter().collect();
        self.model = self.find_model(&frames);
        self.core = None;
        if self.model.is_some() {
            return Ok(SatResult::Sat);
        }
        if self.cores {
            self.core = Some(self.deletion_core());
        }
        Ok(SatResult::Unsat)
    }

    fn model(&mut self) -> Result<Option<Model>, Infallible> {
        Ok(self.model.clone())
    }

    fn supports_unsat_core(&self) -> bool {
        self.cores
    }

    fn unsat_core(&mut self) -> Result<Option<Vec<FrameId>>, Infallible> {
        Ok(self.core.clone())
    }
}

/// [`EnumeratingFactory`] sessions that interpolate, always answering with
/// the same formula.
#[derive(Debug, Clone)]
pub struct FixedInterpolantFactory {
    pub inner: EnumeratingFactory,
    pub interpolant: SmtTerm,
}

impl SolverFactory for FixedInterpolantFactory {
    type Solver = FixedInterpolantSolver;

    fn open(&self, config: SessionConfig) -> Result<FixedInterpolantSolver, Infallible> {
        Ok(FixedInterpolantSolver {
            inner: self.inner.open(config)?,
            interpolation: config.interpolation,
            interpolant: self.interpolant.clone(),
        })
    }
}

pub struct FixedInterpolantSolver {
    inner: EnumeratingSolver,
    interpolation: bool,
    interpolant: SmtTerm,
}

impl SmtSolver for FixedInterpolantSolver {
    type Error = Infallible;

    fn push(&mut self, term: &SmtTerm) -> Result<FrameId, Infallible> {
        self.inner.push(term)
    }

    fn pop(&mut self) -> Result<(), Infallible> {
        self.inner.pop()
    }

    fn check_sat(&mut self) -> Result<SatResult, Infallible> {
        self.inner.check_sat()
    }

    fn model(&mut self) -> Result<Option<Model>, Infallible> {
        self.inner.model()
    }

    fn supports_interpolation(&self) -> bool {
        self.interpolation
    }

    fn interpolant(&mut self, _frames: &[FrameId]) -> Result<Option<SmtTerm>, Infallible> {
        Ok(self.interpolation.then(|| self.interpolant.clone()))
    }

    fn supports_unsat_core(&self) -> bool {
        self.inner.supports_unsat_core()
    }

    fn unsat_core(&mut self) -> Result<Option<Vec<FrameId>>, Infallible> {
        self.inner.unsat_core()
    }
}

/// Unsatisfiable exactly when every required formula is on the stack.
#[derive(Debug, Clone)]
pub struct RequiredSubsetFactory {
    pub required: BTreeSet<SmtTerm>,
    pub cores: bool,
}

impl SolverFactory for RequiredSubsetFactory {
    type Solver = RequiredSubsetSolver;

    fn open(&self, config: SessionConfig) -> Result<RequiredSubsetSolver, Infallible> {
        Ok(RequiredSubsetSolver {
            required: self.required.clone(),
            cores: self.cores && config.unsat_core,
            frames: Vec::new(),
        })
    }
}

pub struct RequiredSubsetSolver {
    required: BTreeSet<SmtTerm>,
    cores: bool,
    frames: Vec<SmtTerm>,
}

impl RequiredSubsetSolver {
    fn all_required_present(&self) -> bool {
        self.required.iter().all(|r| self.frames.contains(r))
    }
}

impl SmtSolver for RequiredSubsetSolver {
    type Error = Infallible;

    fn push(&mut self, term: &SmtTerm) -> Result<FrameId, Infallible> {
        self.frames.push(term.clone());
        Ok(FrameId(self.frames.len() - 1))
    }

    fn pop(&mut self) -> Result<(), Infallible> {
        self.frames.pop();
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Infallible> {
        Ok(if self.all_required_present() {
            SatResult::Unsat
        } else {
            SatResult::Sat
        })
    }

    fn model(&mut self) -> Result<Option<Model>, Infallible> {
        Ok(Some(Model::default()))
    }

    fn supports_unsat_core(&self) -> bool {
        self.cores
    }

    fn unsat_core(&mut self) -> Result<Option<Vec<FrameId>>, Infallible> {
        if !self.all_required_present() {
            return Ok(None);
        }
        let core = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| self.required.contains(*f))
            .map(|(i, _)| FrameId(i))
            .collect();
        Ok(Some(core))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
