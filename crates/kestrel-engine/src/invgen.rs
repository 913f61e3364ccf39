//! Auxiliary invariant generation running next to the proof loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use kestrel_smt::shutdown::ShutdownNotifier;
use kestrel_smt::terms::SmtTerm;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::gate::HeadStartGate;
use crate::options::HeadStartMode;
use crate::reached::{AbstractState, LocationId};

/// Versioned snapshot of externally supplied invariants.
///
/// Formulas are unindexed. Locations without an entry have invariant `true`.
/// An unchanged version means an unchanged supply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvariantMap {
    version: u64,
    invariants: BTreeMap<LocationId, SmtTerm>,
}

impl InvariantMap {
    pub fn trivial() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_trivial(&self) -> bool {
        self.invariants.values().all(SmtTerm::is_true)
    }

    pub fn invariant_for(&self, location: LocationId) -> SmtTerm {
        self.invariants
            .get(&location)
            .cloned()
            .unwrap_or_else(|| SmtTerm::bool(true))
    }

    /// Conjoin `update` into a new snapshot with the next version.
    pub fn strengthened(&self, update: BTreeMap<LocationId, SmtTerm>) -> Self {
        let mut invariants = self.invariants.clone();
        for (location, formula) in update {
            let merged = SmtTerm::conjunction(vec![self.invariant_for(location), formula]);
            invariants.insert(location, merged);
        }
        Self {
            version: self.version + 1,
            invariants,
        }
    }

    /// `AND over loop-head states (path formula => invariant)`.
    pub fn assertion<'a>(&self, states: impl IntoIterator<Item = &'a AbstractState>) -> SmtTerm {
        SmtTerm::conjunction(
            states
                .into_iter()
                .filter(|s| s.is_loop_head)
                .filter_map(|s| {
                    let invariant = self.invariants.get(&s.location)?;
                    Some(s.path_formula.clone().implies_simplified(s.instantiate(invariant)))
                }),
        )
    }
}

/// An auxiliary analysis proving invariants while the proof loop runs.
pub trait InvariantGenerator {
    fn start(&mut self, initial_location: LocationId) -> Result<(), EngineError>;

    /// Non-blocking; once true it stays true.
    fn is_program_safe(&self) -> bool;

    fn supplier(&self) -> Arc<InvariantMap>;

    fn cancel(&mut self);

    /// Block until the generator has had its head start.
    fn wait_for_head_start(&self, shutdown: &ShutdownNotifier, mode: HeadStartMode);
}

/// Supplies nothing.
#[derive(Debug, Default)]
pub struct DoNothingInvariantGenerator {
    trivial: Arc<InvariantMap>,
}

impl InvariantGenerator for DoNothingInvariantGenerator {
    fn start(&mut self, _initial_location: LocationId) -> Result<(), EngineError> {
        Ok(())
    }

    fn is_program_safe(&self) -> bool {
        false
    }

    fn supplier(&self) -> Arc<InvariantMap> {
        self.trivial.clone()
    }

    fn cancel(&mut self) {}

    fn wait_for_head_start(&self, _shutdown: &ShutdownNotifier, _mode: HeadStartMode) {}
}

/// Outcome of one refinement round of an [`InvariantSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refinement {
    Strengthened(BTreeMap<LocationId, SmtTerm>),
    LikelyLongRunning,
    /// No further refinement is possible.
    Exhausted,
    ProgramSafe,
}

/// The analysis driven by a [`ConcurrentInvariantGenerator`].
pub trait InvariantSource: Send + 'static {
    fn initialize(&mut self, _initial_location: LocationId) -> Result<(), EngineError> {
        Ok(())
    }

    fn refine(&mut self, shutdown: &ShutdownNotifier) -> Result<Refinement, EngineError>;
}

struct Shared {
    supply: RwLock<Arc<InvariantMap>>,
    safe: AtomicBool,
    exhausted: HeadStartGate,
    long_running: HeadStartGate,
}

impl Shared {
    fn publish(&self, update: BTreeMap<LocationId, SmtTerm>) {
        let mut supply = self.supply.write().unwrap_or_else(PoisonError::into_inner);
        let next = supply.strengthened(update);
        debug!(version = next.version(), "published invariants");
        *supply = Arc::new(next);
    }

    fn degrade(&self) {
        let mut supply = self.supply.write().unwrap_or_else(PoisonError::into_inner);
        let version = supply.version() + 1;
        *supply = Arc::new(InvariantMap {
            version,
            invariants: BTreeMap::new(),
        });
    }

    fn finish(&self) {
        self.long_running.release();
        self.exhausted.release();
    }
}

/// Runs an [`InvariantSource`] on its own thread and publishes a
/// monotonically strengthened supply.
pub struct ConcurrentInvariantGenerator {
    source: Option<Box<dyn InvariantSource>>,
    shared: Arc<Shared>,
    shutdown: ShutdownNotifier,
    handle: Option<JoinHandle<()>>,
}

impl ConcurrentInvariantGenerator {
    /// The generator stops when `parent` requests shutdown or on `cancel`.
    pub fn new(source: impl InvariantSource, parent: &ShutdownNotifier) -> Self {
        let shutdown = ShutdownNotifier::new();
        let own = shutdown.clone();
        parent.register(move |reason| own.request(reason));
        Self {
            source: Some(Box::new(source)),
            shared: Arc::new(Shared {
                supply: RwLock::new(Arc::new(InvariantMap::trivial())),
                safe: AtomicBool::new(false),
                exhausted: HeadStartGate::new(),
                long_running: HeadStartGate::new(),
            }),
            shutdown,
            handle: None,
        }
    }

    fn run(mut source: Box<dyn InvariantSource>, shared: &Shared, shutdown: &ShutdownNotifier, initial_location: LocationId) {
        if let Err(err) = source.initialize(initial_location) {
            warn!(error = %err, "invariant generator failed to start; continuing without external invariants");
            shared.degrade();
            return;
        }
        while !shutdown.is_requested() {
            match source.refine(shutdown) {
                Ok(Refinement::Strengthened(update)) => shared.publish(update),
                Ok(Refinement::LikelyLongRunning) => {
                    debug!("invariant generator is likely long running");
                    shared.long_running.release();
                }
                Ok(Refinement::Exhausted) => {
                    debug!("invariant generator cannot refine further");
                    break;
                }
                Ok(Refinement::ProgramSafe) => {
                    info!("invariant generator proved the program safe");
                    shared.safe.store(true, Ordering::SeqCst);
                    break;
                }
                Err(EngineError::Interrupted(_)) => break,
                Err(err) => {
                    warn!(error = %err, "invariant generation failed; continuing without external invariants");
                    shared.degrade();
                    break;
                }
            }
        }
    }
}

impl InvariantGenerator for ConcurrentInvariantGenerator {
    fn start(&mut self, initial_location: LocationId) -> Result<(), EngineError> {
        let Some(source) = self.source.take() else {
            return Err(EngineError::InvariantGeneration("generator already started".to_string()));
        };
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name("invariant-generator".to_string())
            .spawn(move || {
                Self::run(source, &shared, &shutdown, initial_location);
                shared.finish();
            })
            .map_err(|e| EngineError::InvariantGeneration(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn is_program_safe(&self) -> bool {
        self.shared.safe.load(Ordering::SeqCst)
    }

    fn supplier(&self) -> Arc<InvariantMap> {
        self.shared
            .supply
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cancel(&mut self) {
        self.shutdown.request("invariant generation cancelled");
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("invariant generator thread panicked");
            }
        }
        self.shared.finish();
    }

    fn wait_for_head_start(&self, shutdown: &ShutdownNotifier, mode: HeadStartMode) {
        let released = match mode {
            HeadStartMode::None => return,
            HeadStartMode::UntilExhausted => self.shared.exhausted.wait(shutdown),
            HeadStartMode::UntilLikelyLongRunning => self.shared.long_running.wait(shutdown),
        };
        debug!(?mode, released, "head start over");
    }
}

impl Drop for ConcurrentInvariantGenerator {
    fn drop(&mut self) {
        self.cancel();
    }
}
