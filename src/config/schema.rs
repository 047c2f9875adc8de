//! Configuration schema definitions for shardline.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ShardlineConfig   - Run name, output directory, coverage switch
//! ├── ShardConfig[]     - One entry per device
//! └── ReportConfig      - JUnit output settings
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration structure for shardline.
///
/// # TOML Structure
///
/// ```toml
/// [shardline]
/// run_name = "instrumentation"
/// output_dir = "shardline-output"
/// code_coverage = true
///
/// [[shards]]
/// serial = "emulator-5554"
/// events = "logs/emulator-5554.jsonl"
/// coverage = "cov/emulator-5554.ec"
///
/// [report]
/// junit = true
/// junit_file = "junit.xml"
/// suite_name = "shardline"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Core settings (optional, has defaults).
    #[serde(default)]
    pub shardline: ShardlineConfig,

    /// Devices taking part in the run.
    #[serde(default)]
    pub shards: Vec<ShardConfig>,

    /// Report configuration for output generation (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Resolves relative paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        self.shardline.output_dir = base.join(&self.shardline.output_dir);
        for shard in &mut self.shards {
            shard.events = base.join(&shard.events);
            if let Some(coverage) = &shard.coverage {
                shard.coverage = Some(base.join(coverage));
            }
        }
    }

    /// Path of the JUnit XML report.
    pub fn junit_path(&self) -> PathBuf {
        self.shardline.output_dir.join(&self.report.junit_file)
    }
}

/// Core run settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `run_name` | None (first device's run name) |
/// | `output_dir` | `"shardline-output"` |
/// | `code_coverage` | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShardlineConfig {
    /// Name reported for the combined run.
    ///
    /// When unset the run name announced by the first device is used.
    #[serde(default)]
    pub run_name: Option<String>,

    /// Directory receiving reports and coverage.
    ///
    /// Coverage lands in `{output_dir}/coverage/`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Collect coverage after every test and merge it across devices.
    #[serde(default)]
    pub code_coverage: bool,
}

impl Default for ShardlineConfig {
    fn default() -> Self {
        Self {
            run_name: None,
            output_dir: default_output_dir(),
            code_coverage: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("shardline-output")
}

/// One device of the run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
    /// Device serial. Sanitized before use in paths.
    pub serial: String,

    /// JSON-lines event log recorded on the device.
    pub events: PathBuf,

    /// Coverage dump of the device, if it has one.
    #[serde(default)]
    pub coverage: Option<PathBuf>,
}

/// Configuration for test result reporting.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `junit` | `true` |
/// | `junit_file` | `"junit.xml"` |
/// | `suite_name` | `"shardline"` |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Whether to generate a JUnit XML report.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub junit: bool,

    /// Filename for the JUnit XML report, written to
    /// `{output_dir}/{junit_file}`.
    ///
    /// Default: `"junit.xml"`
    #[serde(default = "default_junit_file")]
    pub junit_file: String,

    /// Test suite name in the JUnit XML report.
    ///
    /// Default: `"shardline"`
    #[serde(default = "default_suite_name")]
    pub suite_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            junit: true,
            junit_file: default_junit_file(),
            suite_name: default_suite_name(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}

fn default_suite_name() -> String {
    "shardline".to_string()
}
