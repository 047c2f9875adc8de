//! JUnit XML report generation.
//!
//! Generates JUnit XML format test reports, which are the de facto standard
//! for CI/CD systems. The report of a sharded run holds one `<testsuite>`
//! covering the test cases of every shard.
//!
//! # Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" time="12.000">
//!   <testsuite name="shardline" tests="3" failures="1" errors="0" skipped="1" time="12.000">
//!     <testcase classname="com.example.LoginTest" name="validLogin" time="1.250"/>
//!     <testcase classname="com.example.LoginTest" name="badPassword" time="0.900">
//!       <failure message="java.lang.AssertionError" type="AssertionError">
//!         java.lang.AssertionError
//!           at com.example.LoginTest.badPassword(LoginTest.java:42)
//!       </failure>
//!     </testcase>
//!     <testcase classname="com.example.SignupTest" name="legacyFlow" time="0.000">
//!       <skipped/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! # Example
//!
//! ```
//! use shardline::report::JUnitListener;
//!
//! let listener = JUnitListener::new("shardline-output/junit.xml".into())
//!     .with_testsuite_name("app-instrumentation");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::info;

use super::{CaseCollector, CaseResult, CaseStatus};
use crate::identity::TestIdentifier;
use crate::listener::{ListenerError, ListenerResult, Metrics, TestRunListener};

/// Listener that writes a JUnit XML report when the run ends.
///
/// The file is created or overwritten; parent directories are created
/// automatically.
pub struct JUnitListener {
    output_path: PathBuf,
    cases: CaseCollector,
    testsuite_name: String,
}

impl JUnitListener {
    /// Creates a new JUnit listener that writes to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            cases: CaseCollector::new(),
            testsuite_name: "shardline".to_string(),
        }
    }

    /// Sets the test suite name in the XML output.
    ///
    /// The default name is `"shardline"`.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Generate JUnit XML content from the collected cases.
    pub fn generate_xml(&self, elapsed: Duration) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let results = self.cases.results();
        let tests = results.len().to_string();
        let failures = self.cases.count(CaseStatus::Failed).to_string();
        let skipped = (self.cases.count(CaseStatus::Ignored)
            + self.cases.count(CaseStatus::AssumptionFailure))
        .to_string();
        let time = format!("{:.3}", elapsed.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", "0"));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", sanitize_xml(&self.testsuite_name).as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", "0"));
        testsuite.push_attribute(("skipped", skipped.as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for result in results {
            write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    result: &CaseResult,
) -> anyhow::Result<()> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", sanitize_xml(result.test.class_name()).as_str()));
    testcase.push_attribute(("name", sanitize_xml(result.test.test_name()).as_str()));
    testcase.push_attribute((
        "time",
        format!("{:.3}", result.duration.as_secs_f64()).as_str(),
    ));

    match result.status {
        CaseStatus::Passed => {
            writer.write_event(Event::Empty(testcase))?;
        }
        CaseStatus::Failed => {
            writer.write_event(Event::Start(testcase))?;

            let trace = result.trace.as_deref().map(sanitize_xml).unwrap_or_default();
            let mut failure = BytesStart::new("failure");
            if let Some(message) = trace.lines().next() {
                failure.push_attribute(("message", message));
            }
            failure.push_attribute(("type", "AssertionError"));
            writer.write_event(Event::Start(failure))?;
            if !trace.is_empty() {
                writer.write_event(Event::Text(BytesText::new(&trace)))?;
            }
            writer.write_event(Event::End(BytesEnd::new("failure")))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        CaseStatus::AssumptionFailure | CaseStatus::Ignored => {
            writer.write_event(Event::Start(testcase))?;

            let mut skipped = BytesStart::new("skipped");
            if let Some(message) = result
                .trace
                .as_deref()
                .and_then(|trace| trace.lines().next())
            {
                skipped.push_attribute(("message", sanitize_xml(message).as_str()));
            }
            writer.write_event(Event::Empty(skipped))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
    }

    Ok(())
}

impl TestRunListener for JUnitListener {
    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
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
        self.cases.ended(test);
        Ok(())
    }

    fn test_run_ended(&mut self, elapsed: Duration, _metrics: &Metrics) -> ListenerResult {
        let xml = self.generate_xml(elapsed)?;

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.output_path, xml).map_err(ListenerError::Io)?;

        info!("JUnit XML written to: {}", self.output_path.display());
        Ok(())
    }
}

/// Remove characters that are not allowed in XML documents.
///
/// Escaping of markup characters is left to the XML writer.
fn sanitize_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}
