use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "honing-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

fn write_request(label: &str, body: &str) -> std::path::PathBuf {
    let path = temp_path(label);
    std::fs::write(&path, body).expect("write request");
    path
}

const SINGLE_STAGE: &str = r#"{
    "prices": {"ore": 5, "book": 768, "breath": 50},
    "stage": {
        "baseProbability": 0.1,
        "baseCost": {"ore": 10},
        "books": [{"id": "book", "addedProbability": 0.1}],
        "breaths": [{"id": "breath", "addedProbability": 0.05, "maxUse": 10}]
    }
}"#;

#[test]
fn cli_defaults_prints_rules() {
    let exe = env!("CARGO_BIN_EXE_honing");
    let output = Command::new(exe).arg("defaults").output().expect("run cli");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(value["rules"]["energyDivisor"], serde_json::json!(2.15));
    assert_eq!(value["strategyLabels"].as_array().map(Vec::len), Some(4));
}

#[test]
fn cli_rank_lists_every_strategy() {
    let exe = env!("CARGO_BIN_EXE_honing");
    let request = write_request("rank", SINGLE_STAGE);
    let output = Command::new(exe)
        .arg("rank")
        .arg(&request)
        .output()
        .expect("run cli");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(value["strategyCount"], serde_json::json!(4));
    assert_eq!(value["recommended"], serde_json::json!("none"));

    let entries = value["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0]["rank"], serde_json::json!(1));
    assert_eq!(entries[0]["worstCaseAttempts"], serde_json::json!(15));
    assert!(entries[0].get("steps").is_none());
}

#[test]
fn cli_evaluate_writes_trace_to_output_file() {
    let exe = env!("CARGO_BIN_EXE_honing");
    let request = write_request("evaluate", SINGLE_STAGE);
    let output_path = temp_path("evaluate-out");
    let status = Command::new(exe)
        .args(["evaluate", "--strategy", "breaths", "--trace", "--output"])
        .arg(&output_path)
        .arg(&request)
        .status()
        .expect("run cli");
    assert!(status.success());

    let content = std::fs::read_to_string(output_path).expect("read output");
    let value: serde_json::Value = serde_json::from_str(&content).expect("json output");
    let summary = &value["summary"];
    assert_eq!(summary["label"], serde_json::json!("breaths"));
    assert_eq!(summary["steps"].as_array().map(Vec::len), Some(5));
    assert_eq!(summary["worstCaseMaterials"]["breath"], serde_json::json!(40.0));
}

#[test]
fn cli_rejects_invalid_stage() {
    let exe = env!("CARGO_BIN_EXE_honing");
    let request = write_request(
        "invalid",
        r#"{"prices": {"ore": 5}, "stage": {"baseProbability": 0, "baseCost": {"ore": 10}}}"#,
    );
    let output = Command::new(exe)
        .arg("rank")
        .arg(&request)
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("base probability"), "stderr: {stderr}");
}
