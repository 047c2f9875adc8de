//! Test reporting and output generation.
//!
//! Reporting sinks are ordinary [`TestRunListener`]s registered on the
//! combined run. They see every per-test event from every shard and exactly
//! one run boundary, so they report the sharded run as a single run.

pub mod junit;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::identity::TestIdentifier;
use crate::listener::{ListenerResult, Metrics, TestRunListener};

pub use junit::JUnitListener;

/// Final status of a reported test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed,
    /// The test reported an assumption failure and did not really run.
    AssumptionFailure,
    Ignored,
}

/// A test case whose `test_ended` event has been seen.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub test: TestIdentifier,
    pub status: CaseStatus,
    pub trace: Option<String>,
    pub duration: Duration,
}

struct PendingCase {
    started: Instant,
    status: CaseStatus,
    trace: Option<String>,
}

/// Turns the per-test event stream into finished [`CaseResult`]s.
///
/// Cases are keyed by their exact identifier, so parameterized variants are
/// reported separately. Events for a test that never started still produce
/// a case.
#[derive(Default)]
pub struct CaseCollector {
    pending: HashMap<TestIdentifier, PendingCase>,
    finished: Vec<CaseResult>,
}

impl CaseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&mut self, test: &TestIdentifier) {
        self.pending.insert(
            test.clone(),
            PendingCase {
                started: Instant::now(),
                status: CaseStatus::Passed,
                trace: None,
            },
        );
    }

    pub fn mark(&mut self, test: &TestIdentifier, status: CaseStatus, trace: Option<&str>) {
        let case = self
            .pending
            .entry(test.clone())
            .or_insert_with(|| PendingCase {
                started: Instant::now(),
                status: CaseStatus::Passed,
                trace: None,
            });
        case.status = status;
        if let Some(trace) = trace {
            case.trace = Some(trace.to_string());
        }
    }

    /// Finishes a case and returns it.
    pub fn ended(&mut self, test: &TestIdentifier) -> &CaseResult {
        let (status, trace, duration) = match self.pending.remove(test) {
            Some(case) => (case.status, case.trace, case.started.elapsed()),
            None => (CaseStatus::Passed, None, Duration::ZERO),
        };
        self.finished.push(CaseResult {
            test: test.clone(),
            status,
            trace,
            duration,
        });
        &self.finished[self.finished.len() - 1]
    }

    /// Finished cases in completion order.
    pub fn results(&self) -> &[CaseResult] {
        &self.finished
    }

    pub fn count(&self, status: CaseStatus) -> usize {
        self.finished.iter().filter(|c| c.status == status).count()
    }
}

/// Listener printing per-test status and a final summary to the terminal.
pub struct ConsoleListener {
    cases: CaseCollector,
    verbose: bool,
    expected: Option<usize>,
}

impl ConsoleListener {
    /// Create a new console listener.
    ///
    /// Passing tests are only listed when `verbose` is set.
    pub fn new(verbose: bool) -> Self {
        Self {
            cases: CaseCollector::new(),
            verbose,
            expected: None,
        }
    }

    pub fn cases(&self) -> &CaseCollector {
        &self.cases
    }

    fn print_summary(&self, elapsed: Duration) {
        let passed = self.cases.count(CaseStatus::Passed);
        let failed = self.cases.count(CaseStatus::Failed);
        let skipped =
            self.cases.count(CaseStatus::Ignored) + self.cases.count(CaseStatus::AssumptionFailure);

        println!();
        println!("Test Results:");
        println!("  Total:   {}", self.cases.results().len());
        println!("  Passed:  {}", console::style(passed).green());
        println!("  Failed:  {}", console::style(failed).red());
        println!("  Skipped: {}", console::style(skipped).yellow());
        if let Some(expected) = self.expected
            && expected > self.cases.results().len()
        {
            println!(
                "  Not Run: {}",
                console::style(expected - self.cases.results().len())
                    .red()
                    .bold()
            );
        }
        println!("  Duration: {:?}", elapsed);

        println!();
        if failed == 0 {
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!("{}", console::style("Some tests failed.").red().bold());
            println!();
            println!("Failed tests:");
            for case in self.cases.results() {
                if case.status == CaseStatus::Failed {
                    println!("  - {}", case.test);
                    if let Some(first_line) = case.trace.as_deref().and_then(|t| t.lines().next()) {
                        println!("    {}", console::style(first_line).dim());
                    }
                }
            }
        }
    }
}

impl TestRunListener for ConsoleListener {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.expected = Some(test_count);
        println!("Running {} tests ({})", test_count, run_name);
        Ok(())
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        if self.verbose {
            println!("Running: {}", test);
        }
        self.cases.started(test);
        Ok(())
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.cases.mark(test, CaseStatus::Failed, Some(trace));
        Ok(())
    }

    fn test_assumption_failure(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.cases
            .mark(test, CaseStatus::AssumptionFailure, Some(trace));
        Ok(())
    }

    fn test_ignored(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.cases.mark(test, CaseStatus::Ignored, None);
        Ok(())
    }

    fn test_ended(&mut self, test: &TestIdentifier, _metrics: &Metrics) -> ListenerResult {
        let verbose = self.verbose;
        let case = self.cases.ended(test);
        let status = match case.status {
            CaseStatus::Passed => console::style("PASS").green(),
            CaseStatus::Failed => console::style("FAIL").red(),
            CaseStatus::AssumptionFailure | CaseStatus::Ignored => console::style("SKIP").yellow(),
        };
        if verbose || case.status != CaseStatus::Passed {
            println!("{} {}", status, case.test);
        }
        Ok(())
    }

    fn test_run_ended(&mut self, elapsed: Duration, _metrics: &Metrics) -> ListenerResult {
        self.print_summary(elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_tracks_outcomes() {
        let mut cases = CaseCollector::new();
        let pass = TestIdentifier::new("Foo", "pass");
        let fail = TestIdentifier::new("Foo", "fail");
        let skip = TestIdentifier::new("Foo", "skip");

        cases.started(&pass);
        cases.ended(&pass);
        cases.started(&fail);
        cases.mark(&fail, CaseStatus::Failed, Some("boom"));
        cases.ended(&fail);
        cases.started(&skip);
        cases.mark(&skip, CaseStatus::Ignored, None);
        cases.ended(&skip);

        assert_eq!(cases.count(CaseStatus::Passed), 1);
        assert_eq!(cases.count(CaseStatus::Failed), 1);
        assert_eq!(cases.count(CaseStatus::Ignored), 1);
        assert_eq!(cases.results()[1].trace.as_deref(), Some("boom"));
    }

    #[test]
    fn test_collector_handles_unstarted_tests() {
        let mut cases = CaseCollector::new();
        let test = TestIdentifier::new("Foo", "never_started");

        let case = cases.ended(&test);

        assert_eq!(case.status, CaseStatus::Passed);
        assert_eq!(case.duration, Duration::ZERO);
    }

    #[test]
    fn test_console_listener_counts_parameterized_variants_separately() {
        let mut console = ConsoleListener::new(false);
        console.test_run_started("run", 2).unwrap();
        for test in [
            TestIdentifier::new("Foo[1]", "t"),
            TestIdentifier::new("Foo[2]", "t"),
        ] {
            console.test_started(&test).unwrap();
            console.test_ended(&test, &Metrics::new()).unwrap();
        }
        console
            .test_run_ended(Duration::from_secs(1), &Metrics::new())
            .unwrap();

        assert_eq!(console.cases().count(CaseStatus::Passed), 2);
    }
}
