//! Integration tests for the Enactor CLI
//!
//! These tests run the actual CLI binary and verify output.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Get the binary to test
fn enactor_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("enactor").unwrap();
    cmd.current_dir(dir).env_remove("ENACTOR_CREDENTIALS");
    cmd
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let file = dir.path().join(name);
    fs::write(&file, content).unwrap();
    file
}

fn function_workflow(resource: &str, outputs: &str) -> String {
    format!(
        r#"
name: demo
root:
  type: function
  name: split
  functionType: splitType
  properties:
    - {{ name: resource, value: "{resource}" }}
  dataIns:
    - {{ name: text, type: string, source: demo/text }}
  dataOuts: {outputs}
"#
    )
}

#[test]
fn test_help_flag() {
    let temp_dir = TempDir::new().unwrap();
    enactor_cmd(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serverless workflows"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_valid_tree() {
    let temp_dir = TempDir::new().unwrap();
    let workflow_file = write(
        &temp_dir,
        "demo.yaml",
        &function_workflow("https://x.azurewebsites.net/api/split", "[]"),
    );

    enactor_cmd(temp_dir.path())
        .args(["validate", workflow_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Name: demo"))
        .stdout(predicate::str::contains("Nodes: 1"));
}

#[test]
fn test_validate_duplicate_names() {
    let temp_dir = TempDir::new().unwrap();
    let workflow_file = write(
        &temp_dir,
        "dup.yaml",
        r#"
name: w
root:
  type: sequence
  name: s
  steps:
    - { type: sequence, name: a }
    - { type: sequence, name: a }
"#,
    );

    enactor_cmd(temp_dir.path())
        .args(["validate", workflow_file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("duplicate node name"));
}

#[test]
fn test_validate_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    enactor_cmd(temp_dir.path())
        .args(["validate", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_dry_run_succeeds_without_network() {
    let temp_dir = TempDir::new().unwrap();
    let workflow_file = write(
        &temp_dir,
        "demo.yaml",
        &function_workflow("https://x.azurewebsites.net/api/split", "[]"),
    );
    let input_file = write(&temp_dir, "input.json", r#"{"text": "a b c"}"#);

    enactor_cmd(temp_dir.path())
        .args([
            "run",
            workflow_file.to_str().unwrap(),
            "--input",
            input_file.to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Running workflow: demo"))
        .stderr(predicate::str::contains("Done!"))
        .stdout(predicate::function(|out: &str| serde_json::from_str::<Value>(out).is_ok()));
}

#[test]
fn test_run_with_missing_input_fails() {
    let temp_dir = TempDir::new().unwrap();
    let workflow_file = write(
        &temp_dir,
        "demo.yaml",
        &function_workflow("https://x.azurewebsites.net/api/split", "[]"),
    );

    enactor_cmd(temp_dir.path())
        .args(["run", workflow_file.to_str().unwrap(), "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Workflow failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_invokes_function_and_exports_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/split"))
        .and(body_json(json!({"text": "a b c"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"words": ["a", "b", "c"]})))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let workflow_file = write(
        &temp_dir,
        "demo.yaml",
        &function_workflow(
            &format!("{}/api/split", server.uri()),
            "[{ name: words, type: collection }]",
        ),
    );
    let input_file = write(&temp_dir, "input.json", r#"{"text": "a b c"}"#);
    let export_file = temp_dir.path().join("events.json");

    let args = vec![
        "run".to_string(),
        workflow_file.to_string_lossy().into_owned(),
        "--input".to_string(),
        input_file.to_string_lossy().into_owned(),
        "--export".to_string(),
        export_file.to_string_lossy().into_owned(),
    ];
    let dir = temp_dir.path().to_path_buf();
    let stdout = tokio::task::spawn_blocking(move || {
        enactor_cmd(&dir)
            .args(&args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    })
    .await
    .unwrap();

    let output: Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(output, json!({"split/words": ["a", "b", "c"]}));

    let events: Value = serde_json::from_str(&fs::read_to_string(&export_file).unwrap()).unwrap();
    let kinds: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"]["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["WORKFLOW_STARTED", "FUNCTION_END", "WORKFLOW_COMPLETED"]);
    assert_eq!(events[1]["kind"]["node_name"], "split");
}
