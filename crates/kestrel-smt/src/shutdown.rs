//! Cooperative cancellation shared between the proof loop, solver sessions
//! and auxiliary workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::solver::SolverError;

type Listener = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
    listeners: Mutex<Vec<Listener>>,
}

/// Cloneable shutdown signal.
///
/// A request is sticky: once set it is never cleared, and the first reason
/// wins.
#[derive(Clone, Default)]
pub struct ShutdownNotifier {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Listeners run on the calling thread, once.
    pub fn request(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = lock(&self.inner.reason);
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
        }
        self.inner.requested.store(true, Ordering::SeqCst);
        tracing::debug!(reason = %reason, "shutdown requested");
        let listeners = std::mem::take(&mut *lock(&self.inner.listeners));
        for listener in &listeners {
            listener(&reason);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        lock(&self.inner.reason).clone()
    }

    /// `Err(Interrupted)` once shutdown has been requested.
    pub fn check(&self) -> Result<(), SolverError> {
        if self.is_requested() {
            Err(SolverError::Interrupted(
                self.reason().unwrap_or_else(|| "shutdown requested".to_string()),
            ))
        } else {
            Ok(())
        }
    }

    /// Run `listener` when shutdown is requested; immediately if it already was.
    pub fn register(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        if let Some(reason) = self.reason() {
            listener(&reason);
            return;
        }
        lock(&self.inner.listeners).push(Box::new(listener));
        // A request may have raced with the registration above.
        if let Some(reason) = self.reason() {
            let pending = std::mem::take(&mut *lock(&self.inner.listeners));
            for l in &pending {
                l(&reason);
            }
        }
    }
}

impl std::fmt::Debug for ShutdownNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownNotifier")
            .field("requested", &self.is_requested())
            .field("reason", &self.reason())
            .finish()
    }
}
