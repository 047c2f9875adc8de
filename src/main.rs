//! shardline CLI - merge sharded instrumentation runs and their coverage.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use shardline::config::{self, Config};
use shardline::coverage::{self, read_exec_file};
use shardline::listener::MultiRunListener;
use shardline::orchestrator::{RunSummary, ShardedRun, replay::RecordedShard};
use shardline::report::{ConsoleListener, JUnitListener};

#[derive(Parser)]
#[command(name = "shardline")]
#[command(about = "Merge sharded instrumentation runs and their coverage", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "shardline.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the configured shards as one combined run
    Run {
        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Collect and merge coverage regardless of the configuration
        #[arg(long)]
        coverage: bool,
    },

    /// Merge the per-device coverage of the given serials
    MergeCoverage {
        /// Output directory holding coverage/<serial>/coverage.ec
        #[arg(short, long, default_value = "shardline-output")]
        output_dir: PathBuf,

        /// Device serials
        #[arg(required = true)]
        serials: Vec<String>,
    },

    /// Merge every file in a folder into <folder>/coverage.ec
    MergeFolder {
        /// Folder containing coverage files
        folder: PathBuf,
    },

    /// Show the contents of a coverage file
    Inspect {
        /// Coverage file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Device serials to add as shards
        #[arg(short, long, default_values_t = [String::from("emulator-5554")])]
        serial: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { junit, coverage } => {
            run_shards(&cli.config, junit, coverage, cli.verbose).await
        }
        Commands::MergeCoverage {
            output_dir,
            serials,
        } => {
            let merged = coverage::merge_by_serial(&serials, &output_dir)?;
            println!("Merged coverage written to {}", merged.display());
            Ok(())
        }
        Commands::MergeFolder { folder } => {
            let merged = coverage::merge_all_in_folder(&folder)?;
            println!("Merged coverage written to {}", merged.display());
            Ok(())
        }
        Commands::Inspect { file, format } => inspect_coverage(&file, &format),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { serial } => init_config(&serial),
    }
}

async fn run_shards(
    config_path: &Path,
    junit_override: Option<PathBuf>,
    coverage_override: bool,
    verbose: bool,
) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    let shards = config
        .shards
        .iter()
        .map(|shard| RecordedShard::load(&shard.serial, &shard.events, shard.coverage.clone()))
        .collect::<Result<Vec<_>>>()?;
    if shards.is_empty() {
        anyhow::bail!("No shards configured in {}", config_path.display());
    }

    let aggregator = create_aggregator(&config, junit_override, verbose);
    let summary = ShardedRun::new(aggregator, config.shardline.output_dir.clone())
        .with_run_name(config.shardline.run_name.clone())
        .with_code_coverage(config.shardline.code_coverage || coverage_override)
        .run(shards)
        .await?;

    print_run_problems(&summary);
    if let Some(merged) = &summary.merged_coverage {
        println!("Merged coverage written to {}", merged.display());
    }
    std::process::exit(summary.exit_code());
}

fn create_aggregator(
    config: &Config,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> MultiRunListener {
    let mut multi = MultiRunListener::new().with_listener(ConsoleListener::new(verbose));

    if config.report.junit {
        let junit_path = junit_override.unwrap_or_else(|| config.junit_path());
        multi = multi.with_listener(
            JUnitListener::new(junit_path).with_testsuite_name(&config.report.suite_name),
        );
    }

    multi
}

fn print_run_problems(summary: &RunSummary) {
    for (serial, error) in &summary.unreachable {
        eprintln!(
            "{} {}: {}",
            console::style("UNREACHABLE").red().bold(),
            serial,
            error
        );
    }
    for failure in &summary.shard_failures {
        eprintln!("{} {}", console::style("RUN FAILED").red().bold(), failure);
    }
    for device in &summary.devices {
        for error in &device.errors {
            eprintln!(
                "{} {}: {}",
                console::style("ERROR").red(),
                device.serial,
                error
            );
        }
    }
}

fn inspect_coverage(path: &Path, format: &str) -> Result<()> {
    let store = read_exec_file(path)?;

    match format {
        "json" => {
            let json = serde_json::json!({
                "sessions": store.sessions(),
                "classes": store.contents().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            println!("Sessions:");
            for session in store.sessions() {
                let start = chrono::DateTime::from_timestamp_millis(session.start)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| session.start.to_string());
                println!("  {} (started {})", session.id, start);
            }
            println!();
            println!("Classes: {}", store.len());
            if store.is_empty() {
                println!("  (no class data)");
            }
            for data in store.contents() {
                println!(
                    "  {:016x} {} {}/{}",
                    data.id(),
                    data.name(),
                    data.hit_count(),
                    data.probes().len()
                );
            }
        }
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!(
                "  Run name: {}",
                config.shardline.run_name.as_deref().unwrap_or("(from device)")
            );
            println!("  Output dir: {}", config.shardline.output_dir.display());
            println!("  Code coverage: {}", config.shardline.code_coverage);
            println!("  Shards: {}", config.shards.len());
            for shard in &config.shards {
                let marker = if shard.events.exists() {
                    console::style("ok").green()
                } else {
                    console::style("missing").red()
                };
                println!(
                    "    {} {} [{}]",
                    shard.serial,
                    shard.events.display(),
                    marker
                );
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(serials: &[String]) -> Result<()> {
    let shards: Vec<String> = serials
        .iter()
        .map(|serial| {
            let file = coverage::COVERAGE_FILE;
            format!(
                r#"[[shards]]
serial = "{serial}"
events = "logs/{sanitized}.jsonl"
# coverage = "coverage/{sanitized}/{file}""#,
                sanitized = shardline::sanitize_serial(serial),
            )
        })
        .collect();

    let config = format!(
        r#"# shardline configuration file

[shardline]
# run_name = "instrumentation"
output_dir = "shardline-output"
code_coverage = false

{}

[report]
junit = true
junit_file = "junit.xml"
suite_name = "shardline"
"#,
        shards.join("\n\n")
    );

    let path = PathBuf::from("shardline.toml");
    if path.exists() {
        eprintln!("shardline.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created shardline.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  shardline run");

    Ok(())
}
