//! Configuration loading and schema definitions for shardline.
//!
//! This module provides types and functions for loading shardline
//! configuration from TOML files or strings. The configuration names the
//! shards of a run, where their recorded events and coverage live, and how
//! results are reported.
//!
//! # The Configuration File Format is described in the README.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads shardline configuration from a TOML file.
///
/// Relative shard paths are resolved against the directory containing the
/// configuration file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use shardline::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("shardline.toml"))?;
/// println!("Shards: {}", config.shards.len());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    Ok(config)
}

/// Loads shardline configuration from a TOML string.
///
/// Useful for testing, embedding configuration, or generating configuration
/// programmatically. Paths are kept as written.
///
/// # Errors
///
/// Returns an error if the string contains invalid TOML syntax or doesn't
/// match the expected schema.
///
/// # Example
///
/// ```
/// use shardline::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [shardline]
///     code_coverage = true
///
///     [[shards]]
///     serial = "emulator-5554"
///     events = "logs/emulator-5554.jsonl"
/// "#)?;
///
/// assert!(config.shardline.code_coverage);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = load_config_str("").unwrap();

        assert_eq!(config.shardline.run_name, None);
        assert_eq!(config.shardline.output_dir, PathBuf::from("shardline-output"));
        assert!(!config.shardline.code_coverage);
        assert!(config.shards.is_empty());
        assert!(config.report.junit);
        assert_eq!(config.report.junit_file, "junit.xml");
        assert_eq!(config.report.suite_name, "shardline");
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [shardline]
            run_name = "nightly"
            output_dir = "out"
            code_coverage = true

            [[shards]]
            serial = "emulator-5554"
            events = "logs/a.jsonl"
            coverage = "cov/a.ec"

            [[shards]]
            serial = "10.0.0.2:5555"
            events = "logs/b.jsonl"

            [report]
            junit = false
            suite_name = "app"
            "#,
        )
        .unwrap();

        assert_eq!(config.shardline.run_name.as_deref(), Some("nightly"));
        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.shards[0].coverage, Some(PathBuf::from("cov/a.ec")));
        assert_eq!(config.shards[1].coverage, None);
        assert!(!config.report.junit);
        assert_eq!(config.report.suite_name, "app");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = load_config_str("[shardline]\nmax_parallel = 4\n").unwrap_err();
        assert!(format!("{:#}", err).contains("max_parallel"));
    }

    #[test]
    fn test_load_config_resolves_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shardline.toml");
        std::fs::write(
            &path,
            r#"
            [[shards]]
            serial = "a"
            events = "logs/a.jsonl"
            coverage = "/abs/a.ec"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.shards[0].events, temp_dir.path().join("logs/a.jsonl"));
        assert_eq!(config.shards[0].coverage, Some(PathBuf::from("/abs/a.ec")));
        assert_eq!(
            config.shardline.output_dir,
            temp_dir.path().join("shardline-output")
        );
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/shardline.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
