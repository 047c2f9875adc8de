//! Sharded run driver.
//!
//! Ties the listeners and the coverage merge together into one run over
//! several devices.
//!
//! # Execution Flow
//!
//! ```text
//!   InstrumentationTarget (one per device)
//!       │
//!       │ run(ListTests) ──► RecordingListener        query, all devices concurrently
//!       ▼
//!   QueriedDevice { active, ignored, run name, count }
//!       │
//!       │ multi_run_started(name, Σ counts)           one combined boundary
//!       ▼
//!   DeviceSession ×N ──────► SharedListener<MultiRunListener> ──► sinks
//!       │  run(Single(test)) per active test
//!       │  started/ignored/ended per ignored test
//!       │  pull_coverage per test, merge_all_in_folder
//!       ▼
//!   multi_run_ended()
//!       │
//!       ▼
//!   merge_by_serial ──► <output>/coverage/merged-coverage.ec
//! ```
//!
//! # Example
//!
//! ```no_run
//! use shardline::listener::MultiRunListener;
//! use shardline::orchestrator::{ShardedRun, replay::RecordedShard};
//! use shardline::report::ConsoleListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shard = RecordedShard::load("emulator-5554", "logs/emulator-5554.jsonl".as_ref(), None)?;
//!     let aggregator = MultiRunListener::new().with_listener(ConsoleListener::new(false));
//!
//!     let summary = ShardedRun::new(aggregator, "shardline-output".into())
//!         .run(vec![shard])
//!         .await?;
//!
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod replay;
pub mod session;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info};

use crate::coverage::merge_by_serial;
use crate::identity::TestIdentifier;
use crate::listener::{MultiRunListener, SharedListener, TestRunListener};

pub use session::{DeviceOutcome, DeviceSession, QueriedDevice};

/// Run name used when neither the configuration nor any device names one.
pub const DEFAULT_RUN_NAME: &str = "shardline";

/// What an instrumentation call on a device should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Report every test as started and ended without executing it.
    /// Ignored tests are reported as ignored.
    ListTests,
    /// Execute one logical test, including all of its parameterized variants.
    Single(TestIdentifier),
}

/// A device that can execute instrumentation tests.
///
/// Implementations report lifecycle events of each call to `listener`,
/// including the per-call run boundary.
#[async_trait]
pub trait InstrumentationTarget: Send + Sync {
    /// Device serial, e.g. `emulator-5554` or `10.0.0.2:5555`.
    fn serial(&self) -> &str;

    /// Performs one instrumentation call.
    async fn run(&self, request: &RunRequest, listener: &mut dyn TestRunListener) -> Result<()>;

    /// Copies the coverage dump written for `test` to `dest`.
    ///
    /// Returns `false` if the device has no coverage to offer.
    async fn pull_coverage(&self, _test: &TestIdentifier, _dest: &Path) -> Result<bool> {
        Ok(false)
    }
}

/// Outcome of a whole sharded run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_name: String,

    /// Sum of the test counts reported by the queried devices.
    pub expected_tests: usize,

    /// Combined run duration in whole seconds.
    pub elapsed: Duration,

    pub devices: Vec<DeviceOutcome>,

    /// Run failures reported by individual shards.
    pub shard_failures: Vec<String>,

    /// Devices whose test set could not be queried.
    pub unreachable: Vec<(String, String)>,

    pub merged_coverage: Option<PathBuf>,
}

impl RunSummary {
    /// Returns `true` if every device was reached and ran without errors.
    pub fn success(&self) -> bool {
        self.unreachable.is_empty()
            && self.shard_failures.is_empty()
            && self.devices.iter().all(|d| d.errors.is_empty())
    }

    /// Returns an appropriate process exit code for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Drives one combined run over many devices.
pub struct ShardedRun {
    aggregator: SharedListener<MultiRunListener>,
    output_dir: PathBuf,
    run_name: Option<String>,
    code_coverage: bool,
}

impl ShardedRun {
    /// Creates a run delivering events to `aggregator`'s listeners.
    pub fn new(aggregator: MultiRunListener, output_dir: PathBuf) -> Self {
        Self {
            aggregator: SharedListener::new(aggregator),
            output_dir,
            run_name: None,
            code_coverage: false,
        }
    }

    /// Overrides the run name reported by the devices.
    pub fn with_run_name(mut self, run_name: Option<String>) -> Self {
        self.run_name = run_name;
        self
    }

    /// Enables per-test coverage pulls and the final merge.
    pub fn with_code_coverage(mut self, enabled: bool) -> Self {
        self.code_coverage = enabled;
        self
    }

    /// Runs every active test on its device and reports them as one run.
    ///
    /// # Errors
    ///
    /// Fails on aggregator misuse, on a failing reporting sink and when the
    /// final coverage merge fails, which includes a device that left no
    /// coverage behind. Errors of individual devices are recorded
    /// on the summary instead.
    pub async fn run<T: InstrumentationTarget>(&self, targets: Vec<T>) -> Result<RunSummary> {
        let queries = join_all(targets.into_iter().map(QueriedDevice::query)).await;

        let mut devices = Vec::new();
        let mut unreachable = Vec::new();
        for query in queries {
            match query {
                Ok(device) => devices.push(device),
                Err((serial, e)) => {
                    error!("Failed to list tests on {}: {:#}", serial, e);
                    unreachable.push((serial, format!("{:#}", e)));
                }
            }
        }

        let run_name = self
            .run_name
            .clone()
            .or_else(|| devices.iter().find_map(|d| d.run_name().map(str::to_string)))
            .unwrap_or_else(|| DEFAULT_RUN_NAME.to_string());
        let expected_tests: usize = devices.iter().map(QueriedDevice::test_count).sum();

        info!(
            "Starting run {} with {} tests on {} devices",
            run_name,
            expected_tests,
            devices.len()
        );
        self.aggregator
            .lock()?
            .multi_run_started(&run_name, expected_tests)?;

        let sessions = devices.into_iter().map(|device| {
            DeviceSession::new(device, &self.output_dir, self.code_coverage)
                .execute(self.aggregator.clone())
        });
        let outcomes = join_all(sessions).await;

        let (elapsed, shard_failures) = {
            let mut aggregator = self.aggregator.lock()?;
            let elapsed = aggregator.multi_run_ended()?;
            (elapsed, aggregator.shard_failures().to_vec())
        };
        info!("Run {} finished in {:?}", run_name, elapsed);

        let merged_coverage = if self.code_coverage {
            Some(self.merge_coverage(&outcomes)?)
        } else {
            None
        };

        Ok(RunSummary {
            run_name,
            expected_tests,
            elapsed,
            devices: outcomes,
            shard_failures,
            unreachable,
            merged_coverage,
        })
    }

    fn merge_coverage(&self, outcomes: &[DeviceOutcome]) -> Result<PathBuf> {
        let serials = outcomes.iter().map(|o| o.serial.as_str());
        merge_by_serial(serials, &self.output_dir)
            .context("Failed to merge coverage across devices")
    }
}
