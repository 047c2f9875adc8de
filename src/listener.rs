//! Test lifecycle listeners.
//!
//! A device-side instrumentation run reports its progress as a sequence of
//! lifecycle callbacks:
//!
//! ```text
//! test_run_started(name, count)
//!   ( test_started(id)
//!     [ test_failed(id, trace) | test_assumption_failure(id, trace) | test_ignored(id) ]
//!     test_ended(id, metrics) )*
//! test_run_ended(elapsed, metrics) | test_run_stopped(elapsed) | test_run_failed(message)
//! ```
//!
//! Everything in this crate that consumes or produces such a sequence
//! implements [`TestRunListener`]:
//!
//! - [`recording::RecordingListener`]: tracks which logical tests are active or ignored
//! - [`multi_run::MultiRunListener`]: fans events out and folds shard runs into one run
//! - [`shared::SharedListener`]: serializes events from concurrent shards
//! - [`crate::report`]: console and JUnit sinks

pub mod multi_run;
pub mod recording;
pub mod shared;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::TestIdentifier;

pub use multi_run::{AggregateError, MultiRunListener, RunState, StateError};
pub use recording::RecordingListener;
pub use shared::SharedListener;

/// Key/value metrics attached to a finished test or run.
pub type Metrics = BTreeMap<String, String>;

/// Result type returned by every listener callback.
pub type ListenerResult = Result<(), ListenerError>;

/// Errors raised by a listener while handling a lifecycle event.
///
/// A listener error aborts delivery of the event to any listener registered
/// after the failing one and is handed back to whoever dispatched the event.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The listener failed to write its output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A shared listener was poisoned by a panic on another shard.
    #[error("Listener lock poisoned: {0}")]
    Poisoned(String),

    /// Any other listener failure.
    #[error("Listener error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Receives the lifecycle events of an instrumentation test run.
///
/// All methods default to accepting the event and doing nothing, so an
/// implementation only overrides the events it cares about.
pub trait TestRunListener: Send {
    /// A run has started and expects `test_count` tests.
    fn test_run_started(&mut self, _run_name: &str, _test_count: usize) -> ListenerResult {
        Ok(())
    }

    /// A test has started.
    fn test_started(&mut self, _test: &TestIdentifier) -> ListenerResult {
        Ok(())
    }

    /// A started test has failed.
    fn test_failed(&mut self, _test: &TestIdentifier, _trace: &str) -> ListenerResult {
        Ok(())
    }

    /// A started test violated an assumption and was skipped at runtime.
    fn test_assumption_failure(&mut self, _test: &TestIdentifier, _trace: &str) -> ListenerResult {
        Ok(())
    }

    /// A started test has finished, regardless of outcome.
    fn test_ended(&mut self, _test: &TestIdentifier, _metrics: &Metrics) -> ListenerResult {
        Ok(())
    }

    /// A test was not run because it is marked as ignored.
    fn test_ignored(&mut self, _test: &TestIdentifier) -> ListenerResult {
        Ok(())
    }

    /// The run could not complete, e.g. because the instrumentation crashed.
    fn test_run_failed(&mut self, _message: &str) -> ListenerResult {
        Ok(())
    }

    /// The run was stopped before all tests executed.
    fn test_run_stopped(&mut self, _elapsed: Duration) -> ListenerResult {
        Ok(())
    }

    /// The run has finished.
    fn test_run_ended(&mut self, _elapsed: Duration, _metrics: &Metrics) -> ListenerResult {
        Ok(())
    }
}

impl<L: TestRunListener + ?Sized> TestRunListener for Box<L> {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        (**self).test_run_started(run_name, test_count)
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        (**self).test_started(test)
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        (**self).test_failed(test, trace)
    }

    fn test_assumption_failure(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        (**self).test_assumption_failure(test, trace)
    }

    fn test_ended(&mut self, test: &TestIdentifier, metrics: &Metrics) -> ListenerResult {
        (**self).test_ended(test, metrics)
    }

    fn test_ignored(&mut self, test: &TestIdentifier) -> ListenerResult {
        (**self).test_ignored(test)
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        (**self).test_run_failed(message)
    }

    fn test_run_stopped(&mut self, elapsed: Duration) -> ListenerResult {
        (**self).test_run_stopped(elapsed)
    }

    fn test_run_ended(&mut self, elapsed: Duration, metrics: &Metrics) -> ListenerResult {
        (**self).test_run_ended(elapsed, metrics)
    }
}

/// A listener that ignores every event.
pub struct NullListener;

impl TestRunListener for NullListener {}

/// One lifecycle event in serializable form.
///
/// Shard event logs store one event per line as JSON:
///
/// ```json
/// {"event":"run_started","run_name":"app","test_count":2}
/// {"event":"test_started","test":{"class_name":"com.example.LoginTest","test_name":"signIn"}}
/// {"event":"test_ended","test":{"class_name":"com.example.LoginTest","test_name":"signIn"}}
/// {"event":"run_ended","elapsed_ms":1200}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RunStarted {
        run_name: String,
        test_count: usize,
    },
    TestStarted {
        test: TestIdentifier,
    },
    TestFailed {
        test: TestIdentifier,
        trace: String,
    },
    TestAssumptionFailure {
        test: TestIdentifier,
        trace: String,
    },
    TestEnded {
        test: TestIdentifier,
        #[serde(default)]
        metrics: Metrics,
    },
    TestIgnored {
        test: TestIdentifier,
    },
    RunFailed {
        message: String,
    },
    RunStopped {
        elapsed_ms: u64,
    },
    RunEnded {
        elapsed_ms: u64,
        #[serde(default)]
        metrics: Metrics,
    },
}

impl LifecycleEvent {
    /// The test this event concerns, if it is a per-test event.
    pub fn test(&self) -> Option<&TestIdentifier> {
        match self {
            LifecycleEvent::TestStarted { test }
            | LifecycleEvent::TestFailed { test, .. }
            | LifecycleEvent::TestAssumptionFailure { test, .. }
            | LifecycleEvent::TestEnded { test, .. }
            | LifecycleEvent::TestIgnored { test } => Some(test),
            LifecycleEvent::RunStarted { .. }
            | LifecycleEvent::RunFailed { .. }
            | LifecycleEvent::RunStopped { .. }
            | LifecycleEvent::RunEnded { .. } => None,
        }
    }

    /// Invokes the matching callback on `listener`.
    pub fn deliver(&self, listener: &mut dyn TestRunListener) -> ListenerResult {
        match self {
            LifecycleEvent::RunStarted {
                run_name,
                test_count,
            } => listener.test_run_started(run_name, *test_count),
            LifecycleEvent::TestStarted { test } => listener.test_started(test),
            LifecycleEvent::TestFailed { test, trace } => listener.test_failed(test, trace),
            LifecycleEvent::TestAssumptionFailure { test, trace } => {
                listener.test_assumption_failure(test, trace)
            }
            LifecycleEvent::TestEnded { test, metrics } => listener.test_ended(test, metrics),
            LifecycleEvent::TestIgnored { test } => listener.test_ignored(test),
            LifecycleEvent::RunFailed { message } => listener.test_run_failed(message),
            LifecycleEvent::RunStopped { elapsed_ms } => {
                listener.test_run_stopped(Duration::from_millis(*elapsed_ms))
            }
            LifecycleEvent::RunEnded {
                elapsed_ms,
                metrics,
            } => listener.test_run_ended(Duration::from_millis(*elapsed_ms), metrics),
        }
    }
}
