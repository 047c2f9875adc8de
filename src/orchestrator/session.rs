//! Per-device session: query the test set, then run each test on its own.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{InstrumentationTarget, RunRequest};
use crate::coverage::{device_coverage_dir, merge_all_in_folder};
use crate::identity::TestIdentifier;
use crate::listener::{ListenerResult, Metrics, RecordingListener, TestRunListener};

/// A device whose test set has been listed.
pub struct QueriedDevice<T> {
    target: T,
    recorder: RecordingListener,
}

impl<T: InstrumentationTarget> QueriedDevice<T> {
    /// Lists the tests of `target` with a log-only instrumentation call.
    ///
    /// On failure the device serial is returned alongside the error.
    pub async fn query(target: T) -> Result<Self, (String, anyhow::Error)> {
        let mut recorder = RecordingListener::new();
        match target.run(&RunRequest::ListTests, &mut recorder).await {
            Ok(()) => {
                debug!(
                    "{} reports {} active and {} ignored tests",
                    target.serial(),
                    recorder.active_tests().len(),
                    recorder.ignored_tests().len()
                );
                Ok(Self { target, recorder })
            }
            Err(e) => Err((target.serial().to_string(), e)),
        }
    }

    pub fn serial(&self) -> &str {
        self.target.serial()
    }

    pub fn run_name(&self) -> Option<&str> {
        self.recorder.run_name()
    }

    /// Test count announced by the device, or the number of listed tests.
    pub fn test_count(&self) -> usize {
        self.recorder.test_count().unwrap_or_else(|| {
            self.recorder.active_tests().len() + self.recorder.ignored_tests().len()
        })
    }

    pub fn active_tests(&self) -> Vec<TestIdentifier> {
        self.recorder.active_tests()
    }

    pub fn ignored_tests(&self) -> Vec<TestIdentifier> {
        self.recorder.ignored_tests()
    }
}

/// What happened on one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    pub serial: String,
    pub active_tests: Vec<TestIdentifier>,
    pub ignored_tests: Vec<TestIdentifier>,

    /// Number of instrumentation calls that completed.
    pub executed: usize,

    /// Errors of individual calls; they never abort the session.
    pub errors: Vec<String>,

    /// Merged coverage file of this device, if any coverage was pulled.
    pub coverage: Option<PathBuf>,
}

/// Runs the tests of one queried device against a shared listener.
pub struct DeviceSession<T> {
    device: QueriedDevice<T>,
    coverage_dir: Option<PathBuf>,
}

impl<T: InstrumentationTarget> DeviceSession<T> {
    /// Creates a session; with `code_coverage` set, coverage is collected
    /// below `<output_root>/coverage/<sanitized serial>/`.
    pub fn new(device: QueriedDevice<T>, output_root: &Path, code_coverage: bool) -> Self {
        let coverage_dir =
            code_coverage.then(|| device_coverage_dir(output_root, device.serial()));
        Self {
            device,
            coverage_dir,
        }
    }

    /// Executes every active test, then replays every ignored test.
    pub async fn execute<L: TestRunListener>(self, mut listener: L) -> DeviceOutcome {
        let serial = self.device.serial().to_string();
        let mut outcome = DeviceOutcome {
            serial: serial.clone(),
            active_tests: self.device.active_tests(),
            ignored_tests: self.device.ignored_tests(),
            executed: 0,
            errors: Vec::new(),
            coverage: None,
        };

        let coverage_dir = match &self.coverage_dir {
            Some(dir) => match prepare_dir(dir) {
                Ok(()) => Some(dir.as_path()),
                Err(e) => {
                    warn!("{}: coverage disabled: {:#}", serial, e);
                    outcome.errors.push(format!("{:#}", e));
                    None
                }
            },
            None => None,
        };

        info!(
            "{}: running {} tests ({} ignored)",
            serial,
            outcome.active_tests.len(),
            outcome.ignored_tests.len()
        );

        let mut pulled = 0usize;
        for test in &outcome.active_tests {
            let request = RunRequest::Single(test.clone());
            match self.device.target.run(&request, &mut listener).await {
                Ok(()) => outcome.executed += 1,
                Err(e) => {
                    warn!("{}: {} failed to execute: {:#}", serial, test, e);
                    outcome.errors.push(format!("{}: {:#}", test, e));
                }
            }

            if let Some(dir) = coverage_dir {
                let dest = dir.join(coverage_file_name(test));
                match self.device.target.pull_coverage(test, &dest).await {
                    Ok(true) => pulled += 1,
                    Ok(false) => debug!("{}: no coverage for {}", serial, test),
                    Err(e) => {
                        warn!("{}: failed to pull coverage of {}: {:#}", serial, test, e);
                        outcome.errors.push(format!("{}: {:#}", test, e));
                    }
                }
            }
        }

        for test in &outcome.ignored_tests {
            if let Err(e) = report_ignored(&mut listener, test) {
                warn!("{}: failed to report ignored {}: {}", serial, test, e);
                outcome.errors.push(format!("{}: {}", test, e));
            }
        }

        if let Some(dir) = coverage_dir
            && pulled > 0
        {
            match merge_all_in_folder(dir) {
                Ok(path) => outcome.coverage = Some(path),
                Err(e) => {
                    warn!("{}: {}", serial, e);
                    outcome.errors.push(e.to_string());
                }
            }
        }

        outcome
    }
}

fn report_ignored(listener: &mut dyn TestRunListener, test: &TestIdentifier) -> ListenerResult {
    listener.test_started(test)?;
    listener.test_ignored(test)?;
    listener.test_ended(test, &Metrics::new())
}

fn prepare_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to clear {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

/// File name of the coverage dump of one test.
fn coverage_file_name(test: &TestIdentifier) -> String {
    let stem: String = test
        .to_string()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '#') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}_coverage.ec")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::listener::testing::EventLog;

    /// Lists `Foo#a`, `Foo#b` and an ignored `Foo#skip`; running `Foo#b` fails.
    struct FakeDevice {
        calls: Arc<Mutex<Vec<RunRequest>>>,
    }

    #[async_trait]
    impl InstrumentationTarget for FakeDevice {
        fn serial(&self) -> &str {
            "fake:1"
        }

        async fn run(&self, request: &RunRequest, listener: &mut dyn TestRunListener) -> Result<()> {
            self.calls.lock().unwrap().push(request.clone());
            match request {
                RunRequest::ListTests => {
                    listener.test_run_started("fake", 3)?;
                    for name in ["a", "b"] {
                        let test = TestIdentifier::new("Foo", name);
                        listener.test_started(&test)?;
                        listener.test_ended(&test, &Metrics::new())?;
                    }
                    let skip = TestIdentifier::new("Foo", "skip");
                    listener.test_started(&skip)?;
                    listener.test_ignored(&skip)?;
                    listener.test_ended(&skip, &Metrics::new())?;
                    Ok(())
                }
                RunRequest::Single(test) if test.test_name() == "b" => {
                    anyhow::bail!("instrumentation crashed")
                }
                RunRequest::Single(test) => {
                    listener.test_started(test)?;
                    listener.test_ended(test, &Metrics::new())?;
                    Ok(())
                }
            }
        }
    }

    fn fake() -> FakeDevice {
        FakeDevice {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[tokio::test]
    async fn test_query_records_test_set() {
        let device = QueriedDevice::query(fake()).await.unwrap();

        assert_eq!(device.serial(), "fake:1");
        assert_eq!(device.run_name(), Some("fake"));
        assert_eq!(device.test_count(), 3);
        assert_eq!(
            device.active_tests(),
            vec![TestIdentifier::new("Foo", "a"), TestIdentifier::new("Foo", "b")]
        );
        assert_eq!(device.ignored_tests(), vec![TestIdentifier::new("Foo", "skip")]);
    }

    #[tokio::test]
    async fn test_execute_runs_each_test_and_replays_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let device = QueriedDevice::query(fake()).await.unwrap();

        let outcome = DeviceSession::new(device, temp_dir.path(), false)
            .execute(EventLog::new("s", lines.clone()))
            .await;

        assert_eq!(outcome.executed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("instrumentation crashed"));
        assert!(outcome.coverage.is_none());
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "s:started(Foo#a)",
                "s:ended(Foo#a,0)",
                "s:started(Foo#skip)",
                "s:ignored(Foo#skip)",
                "s:ended(Foo#skip,0)",
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_issues_one_call_per_active_test() {
        let temp_dir = TempDir::new().unwrap();
        let target = fake();
        let calls = target.calls.clone();
        let device = QueriedDevice::query(target).await.unwrap();

        DeviceSession::new(device, temp_dir.path(), false)
            .execute(crate::listener::NullListener)
            .await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                RunRequest::ListTests,
                RunRequest::Single(TestIdentifier::new("Foo", "a")),
                RunRequest::Single(TestIdentifier::new("Foo", "b")),
            ]
        );
    }

    #[test]
    fn test_coverage_file_name() {
        let test = TestIdentifier::new("com.example.Foo[1: x/y]", "run");
        assert_eq!(
            coverage_file_name(&test),
            "com.example.Foo_1__x_y_#run_coverage.ec"
        );
    }
}
