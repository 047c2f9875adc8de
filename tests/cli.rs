use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use shardline::coverage::{ExecDataWriter, ExecutionData, read_exec_file};

fn shardline() -> Command {
    Command::cargo_bin("shardline").unwrap()
}

fn write_coverage(path: &Path, probes: Vec<bool>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ExecDataWriter::new(fs::File::create(path).unwrap()).unwrap();
    writer
        .write_execution_data(&ExecutionData::new(3, "com/example/Main", probes))
        .unwrap();
    writer.finish().unwrap();
}

fn write_log(path: &Path, tests: &[(&str, &str)]) {
    let mut lines = vec![format!(
        r#"{{"event":"run_started","run_name":"com.example.test","test_count":{}}}"#,
        tests.len()
    )];
    for (class, name) in tests {
        let test = format!(r#"{{"class_name":"{class}","test_name":"{name}"}}"#);
        lines.push(format!(r#"{{"event":"test_started","test":{test}}}"#));
        lines.push(format!(r#"{{"event":"test_ended","test":{test}}}"#));
    }
    lines.push(r#"{"event":"run_ended","elapsed_ms":1000}"#.to_string());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, lines.join("\n")).unwrap();
}

#[test]
fn merge_folder_on_empty_dir_fails() {
    let temp_dir = TempDir::new().unwrap();

    shardline()
        .arg("merge-folder")
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No coverage file in path"));

    assert!(!temp_dir.path().join("coverage.ec").exists());
}

#[test]
fn merge_folder_writes_coverage_ec() {
    let temp_dir = TempDir::new().unwrap();
    write_coverage(&temp_dir.path().join("a_coverage.ec"), vec![true, false]);
    write_coverage(&temp_dir.path().join("b_coverage.ec"), vec![false, true]);

    shardline()
        .arg("merge-folder")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("coverage.ec"));

    let store = read_exec_file(&temp_dir.path().join("coverage.ec")).unwrap();
    assert_eq!(store.get("com/example/Main").unwrap().probes(), &[true, true]);
}

#[test]
fn merge_coverage_by_serial() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path();
    write_coverage(
        &output.join("coverage/10_0_0_1_5555/coverage.ec"),
        vec![true, false],
    );
    write_coverage(&output.join("coverage/emulator-5554/coverage.ec"), vec![false, true]);

    shardline()
        .args(["merge-coverage", "--output-dir"])
        .arg(output)
        .args(["10.0.0.1:5555", "emulator-5554"])
        .assert()
        .success();

    assert!(output.join("coverage/merged-coverage.ec").exists());
}

#[test]
fn merge_coverage_missing_device_fails() {
    let temp_dir = TempDir::new().unwrap();

    shardline()
        .args(["merge-coverage", "--output-dir"])
        .arg(temp_dir.path())
        .arg("emulator-5554")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read coverage file"));
}

#[test]
fn inspect_json() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("coverage.ec");
    write_coverage(&file, vec![true, true, false]);

    shardline()
        .args(["inspect", "--format", "json"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("com/example/Main"));
}

#[test]
fn validate_reports_shards() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("shardline.toml");
    fs::write(
        &config,
        r#"
        [[shards]]
        serial = "emulator-5554"
        events = "logs/emulator-5554.jsonl"
        "#,
    )
    .unwrap();

    shardline()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("emulator-5554"));
}

#[test]
fn validate_rejects_bad_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("shardline.toml");
    fs::write(&config, "[[shards]]\nserial = 5\n").unwrap();

    shardline()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn init_creates_config() {
    let temp_dir = TempDir::new().unwrap();

    shardline()
        .current_dir(temp_dir.path())
        .args(["init", "--serial", "10.0.0.2:5555"])
        .assert()
        .success();

    let content = fs::read_to_string(temp_dir.path().join("shardline.toml")).unwrap();
    assert!(content.contains(r#"serial = "10.0.0.2:5555""#));
    assert!(content.contains("logs/10_0_0_2_5555.jsonl"));
    shardline::config::load_config_str(&content).unwrap();

    shardline()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure();
}

#[test]
fn run_replays_shards_into_one_report() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    write_log(&root.join("logs/a.jsonl"), &[("com.example.A", "one")]);
    write_log(
        &root.join("logs/b.jsonl"),
        &[("com.example.B[0]", "two"), ("com.example.B[1]", "two")],
    );
    write_coverage(&root.join("cov/a.ec"), vec![true, false]);
    write_coverage(&root.join("cov/b.ec"), vec![false, true]);
    fs::write(
        root.join("shardline.toml"),
        r#"
        [shardline]
        output_dir = "out"
        code_coverage = true

        [[shards]]
        serial = "emulator-5554"
        events = "logs/a.jsonl"
        coverage = "cov/a.ec"

        [[shards]]
        serial = "10.0.0.2:5555"
        events = "logs/b.jsonl"
        coverage = "cov/b.ec"
        "#,
    )
    .unwrap();

    shardline()
        .arg("--config")
        .arg(root.join("shardline.toml"))
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Running 3 tests (com.example.test)"))
        .stdout(predicate::str::contains("All tests passed!"));

    let junit = fs::read_to_string(root.join("out/junit.xml")).unwrap();
    assert!(junit.contains(r#"tests="3""#));
    assert_eq!(junit.matches("<testsuite ").count(), 1);

    let merged = read_exec_file(&root.join("out/coverage/merged-coverage.ec")).unwrap();
    assert_eq!(merged.get("com/example/Main").unwrap().probes(), &[true, true]);
}
