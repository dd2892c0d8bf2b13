//! End-to-end checks of commands that never reach a cluster

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

const PIPELINE: &str = r#"
environment: test
clusters:
  - id: primary
  - id: secondary
units:
  - name: publish
    cluster: primary
    manifest: apps/publish.yaml
    requires: [transform, data-quality]
  - name: transform
    cluster: primary
    manifest: apps/transform.yaml
    requires: [ingest]
  - name: data-quality
    cluster: secondary
    manifest: apps/data-quality.yaml
    requires: [ingest]
  - name: ingest
    cluster: primary
    manifest: apps/ingest.yaml
"#;

const CYCLE: &str = r#"
clusters:
  - id: primary
units:
  - name: a
    cluster: primary
    manifest: a.yaml
    requires: [b]
  - name: b
    cluster: primary
    manifest: b.yaml
    requires: [a]
"#;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("wavegate.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

fn wavegate(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("wavegate").unwrap();
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

#[test]
fn plan_prints_waves_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PIPELINE);

    let output = wavegate(&config)
        .args(["--output", "json", "plan"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let waves = plan["waves"].as_array().unwrap();
    assert_eq!(waves.len(), 3);
    assert_eq!(waves[0]["units"][0]["name"], "ingest");
    assert_eq!(waves[2]["units"][0]["name"], "publish");
}

#[test]
fn cyclic_declarations_exit_with_validation_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), CYCLE);

    wavegate(&config)
        .arg("plan")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cyclic dependency"));

    // Nothing was recorded
    assert!(!dir.path().join(".wavegate").exists());
}

#[test]
fn status_without_runs_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PIPELINE);

    wavegate(&config)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no runs recorded"));
}

#[test]
fn invalid_component_selection_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PIPELINE);

    wavegate(&config)
        .args(["deploy", "--components", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("waves are numbered from 1"));
}
