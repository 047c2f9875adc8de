//! shardline: one logical test run out of many sharded device runs.
//!
//! Instrumentation tests split across several devices ("shards") produce
//! one event stream and one coverage dump per device. This crate merges them
//! back into a single run for reporting and a single coverage file.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Identity**: Canonical test identifiers with parameter annotations
//!   stripped
//! - **Listener**: The lifecycle listener interface, the identity tracker
//!   and the run aggregator that collapses per-shard run boundaries
//! - **Coverage**: JaCoCo exec-data codec and the cross-device merge
//! - **Orchestrator**: Per-device sessions driving a combined run
//! - **Report**: Console and JUnit XML sinks
//!
//! # Example
//!
//! ```no_run
//! use shardline::config::load_config;
//! use shardline::listener::MultiRunListener;
//! use shardline::orchestrator::{ShardedRun, replay::RecordedShard};
//! use shardline::report::{ConsoleListener, JUnitListener};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("shardline.toml"))?;
//!     let shards = config
//!         .shards
//!         .iter()
//!         .map(|s| RecordedShard::load(&s.serial, &s.events, s.coverage.clone()))
//!         .collect::<anyhow::Result<Vec<_>>>()?;
//!
//!     let aggregator = MultiRunListener::new()
//!         .with_listener(ConsoleListener::new(false))
//!         .with_listener(JUnitListener::new(config.junit_path()));
//!     let summary = ShardedRun::new(aggregator, config.shardline.output_dir.clone())
//!         .with_code_coverage(config.shardline.code_coverage)
//!         .run(shards)
//!         .await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

pub mod config;
pub mod coverage;
pub mod identity;
pub mod listener;
pub mod orchestrator;
pub mod report;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use coverage::{CoverageError, merge_all_in_folder, merge_by_serial};
pub use identity::{TestIdentifier, canonicalize, sanitize_serial};
pub use listener::{MultiRunListener, RecordingListener, TestRunListener};
pub use orchestrator::{InstrumentationTarget, RunSummary, ShardedRun};
