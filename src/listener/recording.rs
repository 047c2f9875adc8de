//! Tracks which logical tests a run has started or ignored.
//!
//! Used against a list-only instrumentation call to learn the test set of a
//! device before running it test by test. Identifiers are canonicalized, so
//! every parameter variant of a test counts once.

use indexmap::IndexSet;

use super::{ListenerResult, TestRunListener};
use crate::identity::{TestIdentifier, canonicalize};

/// Records active and ignored tests in the order they were first seen.
///
/// Outcomes (failures, metrics, run boundaries other than the run start) are
/// not retained. No callback ever fails.
#[derive(Debug, Default)]
pub struct RecordingListener {
    active_tests: IndexSet<TestIdentifier>,
    ignored_tests: IndexSet<TestIdentifier>,
    run_name: Option<String>,
    test_count: Option<usize>,
}

impl RecordingListener {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests that have started and were not later ignored, in start order.
    pub fn active_tests(&self) -> Vec<TestIdentifier> {
        self.active_tests.iter().cloned().collect()
    }

    /// Tests reported as ignored, in the order they were ignored.
    pub fn ignored_tests(&self) -> Vec<TestIdentifier> {
        self.ignored_tests.iter().cloned().collect()
    }

    /// Name from the most recent run start, if any.
    pub fn run_name(&self) -> Option<&str> {
        self.run_name.as_deref()
    }

    /// Expected test count from the most recent run start, if any.
    pub fn test_count(&self) -> Option<usize> {
        self.test_count
    }
}

impl TestRunListener for RecordingListener {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.run_name = Some(run_name.to_string());
        self.test_count = Some(test_count);
        Ok(())
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.active_tests.insert(canonicalize(test));
        Ok(())
    }

    fn test_ignored(&mut self, test: &TestIdentifier) -> ListenerResult {
        let test = canonicalize(test);
        // shift_remove keeps the remaining tests in start order
        self.active_tests.shift_remove(&test);
        self.ignored_tests.insert(test);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS_NAME: &str = "com.some.BusinessTest";
    const TEST_METHOD: &str = "someTest";

    fn plain() -> TestIdentifier {
        TestIdentifier::new(CLASS_NAME, TEST_METHOD)
    }

    fn online() -> TestIdentifier {
        TestIdentifier::new(format!("{CLASS_NAME}[ONLINE]"), TEST_METHOD)
    }

    fn offline() -> TestIdentifier {
        TestIdentifier::new(format!("{CLASS_NAME}[OFFLINE]"), TEST_METHOD)
    }

    #[test]
    fn test_tracks_parameterized_variants_once() {
        let mut recorder = RecordingListener::new();
        recorder.test_started(&online()).unwrap();
        recorder.test_started(&offline()).unwrap();

        assert_eq!(recorder.active_tests(), vec![plain()]);
    }

    #[test]
    fn test_ignore_moves_active_test() {
        let mut recorder = RecordingListener::new();
        recorder.test_started(&plain()).unwrap();
        recorder.test_ignored(&plain()).unwrap();

        assert!(recorder.active_tests().is_empty());
        assert_eq!(recorder.ignored_tests(), vec![plain()]);
    }

    #[test]
    fn test_ignore_without_start() {
        let mut recorder = RecordingListener::new();
        recorder.test_ignored(&plain()).unwrap();

        assert_eq!(recorder.ignored_tests(), vec![plain()]);
        assert!(recorder.active_tests().is_empty());
    }

    #[test]
    fn test_start_has_no_impact_on_ignored() {
        let mut recorder = RecordingListener::new();
        recorder.test_started(&plain()).unwrap();

        assert!(recorder.ignored_tests().is_empty());
    }

    #[test]
    fn test_active_tests_keep_start_order() {
        let first = TestIdentifier::new("A", "t");
        let second = TestIdentifier::new("B", "t");
        let third = TestIdentifier::new("C", "t");

        let mut recorder = RecordingListener::new();
        recorder.test_started(&first).unwrap();
        recorder.test_started(&second).unwrap();
        recorder.test_started(&third).unwrap();
        recorder.test_started(&first).unwrap();
        recorder.test_ignored(&first).unwrap();

        assert_eq!(recorder.active_tests(), vec![second, third]);
    }

    #[test]
    fn test_snapshots_are_independent() {
        let mut recorder = RecordingListener::new();
        recorder.test_started(&plain()).unwrap();
        let snapshot = recorder.active_tests();
        recorder.test_ignored(&plain()).unwrap();

        assert_eq!(snapshot, vec![plain()]);
    }

    #[test]
    fn test_run_metadata_last_writer_wins() {
        let mut recorder = RecordingListener::new();
        assert_eq!(recorder.run_name(), None);
        assert_eq!(recorder.test_count(), None);

        recorder.test_run_started("NAME", 99).unwrap();
        assert_eq!(recorder.run_name(), Some("NAME"));
        assert_eq!(recorder.test_count(), Some(99));

        recorder.test_run_started("OTHER", 3).unwrap();
        assert_eq!(recorder.run_name(), Some("OTHER"));
        assert_eq!(recorder.test_count(), Some(3));
    }

    #[test]
    fn test_outcomes_are_not_recorded() {
        let mut recorder = RecordingListener::new();
        recorder.test_started(&plain()).unwrap();
        recorder.test_failed(&plain(), "trace").unwrap();
        recorder.test_ended(&plain(), &Default::default()).unwrap();
        recorder.test_run_failed("crashed").unwrap();

        assert_eq!(recorder.active_tests(), vec![plain()]);
        assert!(recorder.ignored_tests().is_empty());
    }
}
