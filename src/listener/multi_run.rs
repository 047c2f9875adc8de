//! Aggregates several shard runs into one combined run.
//!
//! Every shard execution reports its own `test_run_started` /
//! `test_run_ended` pair. Forwarding those downstream would produce one run
//! boundary per shard, so [`MultiRunListener`] swallows them and emits a
//! single boundary of its own through [`multi_run_started`] and
//! [`multi_run_ended`]. Per-test events pass through unchanged.
//!
//! [`multi_run_started`]: MultiRunListener::multi_run_started
//! [`multi_run_ended`]: MultiRunListener::multi_run_ended
//!
//! # Example
//!
//! ```
//! use shardline::identity::TestIdentifier;
//! use shardline::listener::{MultiRunListener, RecordingListener, TestRunListener};
//!
//! let mut multi = MultiRunListener::new().with_listener(RecordingListener::new());
//! multi.multi_run_started("app", 2)?;
//!
//! // shard boundaries are absorbed
//! multi.test_run_started("shard-0", 1)?;
//! multi.test_started(&TestIdentifier::new("com.example.LoginTest", "signIn"))?;
//! multi.test_ended(&TestIdentifier::new("com.example.LoginTest", "signIn"), &Default::default())?;
//! multi.test_run_ended(std::time::Duration::from_secs(1), &Default::default())?;
//!
//! let elapsed = multi.multi_run_ended()?;
//! # let _ = elapsed;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{ListenerError, ListenerResult, Metrics, TestRunListener};
use crate::identity::TestIdentifier;

/// Lifecycle of the combined run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Ended,
}

/// Misuse of the combined run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Combined run already started")]
    AlreadyStarted,

    #[error("Combined run already ended")]
    AlreadyEnded,

    #[error("Combined run not started")]
    NotStarted,
}

/// Errors from starting or ending the combined run.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(transparent)]
    State(#[from] StateError),

    /// A downstream listener failed while the boundary was being delivered.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Fans lifecycle events out to downstream listeners, folding shard runs
/// into a single combined run.
///
/// Delegates are notified in registration order. Delivery is fail-fast: the
/// first delegate error stops delivery of that event and is returned to the
/// caller.
///
/// Per-test events are forwarded in every [`RunState`], including before the
/// combined run starts and after it ends. Per-shard `test_run_failed` events
/// are not forwarded; they are collected in [`shard_failures`] instead.
///
/// The listener is not synchronized. Shards running concurrently must
/// deliver their events through a [`SharedListener`](super::SharedListener).
///
/// [`shard_failures`]: MultiRunListener::shard_failures
pub struct MultiRunListener {
    delegates: Vec<Box<dyn TestRunListener>>,
    state: RunState,
    started_at: Option<Instant>,
    shard_failures: Vec<String>,
}

impl MultiRunListener {
    /// Creates an aggregator without downstream listeners.
    pub fn new() -> Self {
        Self {
            delegates: Vec::new(),
            state: RunState::NotStarted,
            started_at: None,
            shard_failures: Vec::new(),
        }
    }

    /// Registers a downstream listener after the existing ones.
    pub fn with_listener<L: TestRunListener + 'static>(mut self, listener: L) -> Self {
        self.add_listener(listener);
        self
    }

    /// Registers a downstream listener after the existing ones.
    pub fn add_listener<L: TestRunListener + 'static>(&mut self, listener: L) {
        self.delegates.push(Box::new(listener));
    }

    /// Number of registered downstream listeners.
    pub fn listener_count(&self) -> usize {
        self.delegates.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Messages of every shard run that reported a failure, in arrival order.
    pub fn shard_failures(&self) -> &[String] {
        &self.shard_failures
    }

    /// Starts the combined run and notifies every delegate once.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the run was already started or ended, or the
    /// first delegate failure.
    pub fn multi_run_started(
        &mut self,
        run_name: &str,
        test_count: usize,
    ) -> Result<(), AggregateError> {
        match self.state {
            RunState::NotStarted => {}
            RunState::Running => return Err(StateError::AlreadyStarted.into()),
            RunState::Ended => return Err(StateError::AlreadyEnded.into()),
        }

        self.state = RunState::Running;
        self.started_at = Some(Instant::now());
        info!(
            "Combined run '{}' started: {} tests expected, {} listeners",
            run_name,
            test_count,
            self.delegates.len()
        );

        self.fan_out(|listener| listener.test_run_started(run_name, test_count))?;
        Ok(())
    }

    /// Ends the combined run and notifies every delegate once.
    ///
    /// Delegates receive the elapsed time since [`multi_run_started`],
    /// truncated to whole seconds, and empty run metrics. The same elapsed
    /// time is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the run was never started or already ended,
    /// or the first delegate failure.
    ///
    /// [`multi_run_started`]: MultiRunListener::multi_run_started
    pub fn multi_run_ended(&mut self) -> Result<Duration, AggregateError> {
        match self.state {
            RunState::Running => {}
            RunState::NotStarted => return Err(StateError::NotStarted.into()),
            RunState::Ended => return Err(StateError::AlreadyEnded.into()),
        }

        let elapsed_secs = self
            .started_at
            .take()
            .map(|started| started.elapsed().as_secs())
            .unwrap_or_default();
        let elapsed = Duration::from_secs(elapsed_secs);
        self.state = RunState::Ended;
        info!("Combined run ended after {}s", elapsed_secs);

        let metrics = Metrics::new();
        self.fan_out(|listener| listener.test_run_ended(elapsed, &metrics))?;
        Ok(elapsed)
    }

    fn fan_out<F>(&mut self, mut deliver: F) -> ListenerResult
    where
        F: FnMut(&mut dyn TestRunListener) -> ListenerResult,
    {
        for delegate in &mut self.delegates {
            deliver(delegate.as_mut())?;
        }
        Ok(())
    }
}

impl Default for MultiRunListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunListener for MultiRunListener {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        debug!("Absorbing shard run start '{}' ({} tests)", run_name, test_count);
        Ok(())
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.fan_out(|listener| listener.test_started(test))
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.fan_out(|listener| listener.test_failed(test, trace))
    }

    fn test_assumption_failure(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.fan_out(|listener| listener.test_assumption_failure(test, trace))
    }

    fn test_ended(&mut self, test: &TestIdentifier, metrics: &Metrics) -> ListenerResult {
        self.fan_out(|listener| listener.test_ended(test, metrics))
    }

    fn test_ignored(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.fan_out(|listener| listener.test_ignored(test))
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        warn!("Shard run failed: {}", message);
        self.shard_failures.push(message.to_string());
        Ok(())
    }

    fn test_run_stopped(&mut self, elapsed: Duration) -> ListenerResult {
        debug!("Absorbing shard run stop after {:?}", elapsed);
        Ok(())
    }

    fn test_run_ended(&mut self, elapsed: Duration, _metrics: &Metrics) -> ListenerResult {
        debug!("Absorbing shard run end after {:?}", elapsed);
        Ok(())
    }
}
