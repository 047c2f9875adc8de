//! A listener handle shared between concurrently running shards.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ListenerError, ListenerResult, Metrics, TestRunListener};
use crate::identity::TestIdentifier;

/// Clonable handle that serializes all events through one mutex.
///
/// Each shard session gets its own clone and uses it as an ordinary
/// [`TestRunListener`]; every callback holds the lock for the duration of
/// the delivery, so events from different shards never interleave inside
/// the wrapped listener.
pub struct SharedListener<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedListener<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: TestRunListener> SharedListener<L> {
    /// Wraps `listener` for shared use.
    pub fn new(listener: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(listener)),
        }
    }

    /// Locks the wrapped listener.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Poisoned`] if a previous holder panicked.
    pub fn lock(&self) -> Result<MutexGuard<'_, L>, ListenerError> {
        self.inner
            .lock()
            .map_err(|e| ListenerError::Poisoned(e.to_string()))
    }

    /// Runs `f` with exclusive access to the wrapped listener.
    pub fn with<R>(&self, f: impl FnOnce(&mut L) -> R) -> Result<R, ListenerError> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Returns the wrapped listener if this is the last handle.
    pub fn into_inner(self) -> Option<L> {
        Arc::try_unwrap(self.inner)
            .ok()
            .and_then(|mutex| mutex.into_inner().ok())
    }
}

impl<L: TestRunListener> TestRunListener for SharedListener<L> {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.lock()?.test_run_started(run_name, test_count)
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.lock()?.test_started(test)
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.lock()?.test_failed(test, trace)
    }

    fn test_assumption_failure(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.lock()?.test_assumption_failure(test, trace)
    }

    fn test_ended(&mut self, test: &TestIdentifier, metrics: &Metrics) -> ListenerResult {
        self.lock()?.test_ended(test, metrics)
    }

    fn test_ignored(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.lock()?.test_ignored(test)
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        self.lock()?.test_run_failed(message)
    }

    fn test_run_stopped(&mut self, elapsed: Duration) -> ListenerResult {
        self.lock()?.test_run_stopped(elapsed)
    }

    fn test_run_ended(&mut self, elapsed: Duration, metrics: &Metrics) -> ListenerResult {
        self.lock()?.test_run_ended(elapsed, metrics)
    }
}
