//! Devices replayed from recorded event logs.
//!
//! A shard event log holds one [`LifecycleEvent`] per line as JSON, as
//! captured from an instrumentation run on a real device. Replaying it
//! behaves like the device: a list call reports the test set, a single-test
//! call reports the events of that test only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use super::{InstrumentationTarget, RunRequest};
use crate::identity::TestIdentifier;
use crate::listener::{LifecycleEvent, Metrics, TestRunListener};

/// A device backed by a recorded event log.
#[derive(Debug, Clone)]
pub struct RecordedShard {
    serial: String,
    events: Vec<LifecycleEvent>,
    coverage: Option<PathBuf>,
}

impl RecordedShard {
    pub fn from_events(serial: impl Into<String>, events: Vec<LifecycleEvent>) -> Self {
        Self {
            serial: serial.into(),
            events,
            coverage: None,
        }
    }

    /// Loads a JSON-lines event log. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error naming the file and line if the log cannot be read or
    /// a line is not a valid event.
    pub fn load(serial: impl Into<String>, path: &Path, coverage: Option<PathBuf>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event log: {}", path.display()))?;
        let events = parse_events(&content)
            .with_context(|| format!("Failed to parse event log: {}", path.display()))?;

        let mut shard = Self::from_events(serial, events);
        shard.coverage = coverage;
        debug!(
            "Loaded {} events for {} from {}",
            shard.events.len(),
            shard.serial,
            path.display()
        );
        Ok(shard)
    }

    /// Uses `path` as the coverage dump offered after every test.
    pub fn with_coverage(mut self, path: PathBuf) -> Self {
        self.coverage = Some(path);
        self
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    fn run_name(&self) -> &str {
        self.events
            .iter()
            .find_map(|event| match event {
                LifecycleEvent::RunStarted { run_name, .. } => Some(run_name.as_str()),
                _ => None,
            })
            .unwrap_or(self.serial.as_str())
    }

    /// Every test in the log in first-seen order, with whether it was ignored.
    fn tests(&self) -> IndexMap<&TestIdentifier, bool> {
        let mut tests = IndexMap::new();
        for event in &self.events {
            match event {
                LifecycleEvent::TestIgnored { test } => {
                    tests.insert(test, true);
                }
                event => {
                    if let Some(test) = event.test() {
                        tests.entry(test).or_insert(false);
                    }
                }
            }
        }
        tests
    }

    fn list_tests(&self, listener: &mut dyn TestRunListener) -> Result<()> {
        let tests = self.tests();
        listener.test_run_started(self.run_name(), tests.len())?;
        for (test, ignored) in tests {
            listener.test_started(test)?;
            if ignored {
                listener.test_ignored(test)?;
            }
            listener.test_ended(test, &Metrics::new())?;
        }
        listener.test_run_ended(Duration::ZERO, &Metrics::new())?;
        Ok(())
    }

    fn run_single(&self, target: &TestIdentifier, listener: &mut dyn TestRunListener) -> Result<()> {
        let events: Vec<&LifecycleEvent> = self
            .events
            .iter()
            .filter(|event| event.test().is_some_and(|test| test.canonical() == *target))
            .collect();

        let variants = self
            .tests()
            .into_keys()
            .filter(|test| test.canonical() == *target)
            .count();
        listener.test_run_started(self.run_name(), variants)?;
        if events.is_empty() {
            listener.test_run_failed(&format!("Test {} not found on {}", target, self.serial))?;
        }
        for event in events {
            event.deliver(listener)?;
        }
        listener.test_run_ended(Duration::ZERO, &Metrics::new())?;
        Ok(())
    }
}

fn parse_events(content: &str) -> Result<Vec<LifecycleEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", idx + 1))
        })
        .collect()
}

#[async_trait]
impl InstrumentationTarget for RecordedShard {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn run(&self, request: &RunRequest, listener: &mut dyn TestRunListener) -> Result<()> {
        match request {
            RunRequest::ListTests => self.list_tests(listener),
            RunRequest::Single(test) => self.run_single(test, listener),
        }
    }

    async fn pull_coverage(&self, _test: &TestIdentifier, dest: &Path) -> Result<bool> {
        let Some(source) = &self.coverage else {
            return Ok(false);
        };
        tokio::fs::copy(source, dest).await.with_context(|| {
            format!(
                "Failed to copy coverage {} to {}",
                source.display(),
                dest.display()
            )
        })?;
        Ok(true)
    }
}
