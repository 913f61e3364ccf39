//! One-shot latch used for the invariant generator's head start.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use kestrel_smt::shutdown::ShutdownNotifier;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Waiting,
    Released,
}

/// Blocks waiters until it is released once, then never again.
#[derive(Debug)]
pub struct HeadStartGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl Default for HeadStartGate {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState::Waiting),
            released: Condvar::new(),
        }
    }
}

impl HeadStartGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::Waiting {
            *state = GateState::Released;
            self.released.notify_all();
        }
    }

    pub fn is_released(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == GateState::Released
    }

    /// Block until the gate is released or shutdown is requested.
    ///
    /// Returns whether the gate was released.
    pub fn wait(&self, shutdown: &ShutdownNotifier) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == GateState::Waiting {
            if shutdown.is_requested() {
                return false;
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }
}
