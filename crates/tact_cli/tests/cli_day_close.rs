use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tact"))
        .args(args)
        .env("TACT_DATA_DIR", dir)
        .env("TACT_CONFIG_PATH", dir.join("config.json"))
        .env("TACT_DISABLE_NOTIFICATIONS", "1")
        .output()
        .expect("failed to run tact")
}

fn run_json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = args.to_vec();
    full.push("--json");
    let output = run(dir, &full);
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn close_day_rolls_unfinished_and_keeps_done() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["add", "A", "--estimate", "30"]);
    run_json(dir.path(), &["add", "B"]);
    let c = run_json(dir.path(), &["add", "C"]);
    run_json(dir.path(), &["done", c["id"].as_str().unwrap()]);

    let report = run_json(dir.path(), &["close-day"]);

    assert_eq!(report["done"].as_array().unwrap().len(), 1);
    let rolled = report["rolled"].as_array().unwrap();
    assert_eq!(rolled.len(), 2);
    for task in rolled {
        assert_eq!(task["rolloverCount"], 1);
        assert_eq!(task["dayKey"], report["nextDay"]);
    }
    let summary = report["summary"].as_str().unwrap();
    assert!(summary.contains("## Done (1)\n- C"));
    assert!(summary.contains("(2)\n- A ~30m\n- B\n"));
    assert_eq!(report["snapshot"]["snapshotMarkdown"], report["summary"]);

    let board = run_json(dir.path(), &["list", "today"]);
    assert!(board["open"].as_array().unwrap().is_empty());
    assert_eq!(board["done"].as_array().unwrap().len(), 1);
}

#[test]
fn close_day_plain_prints_summary_and_escalations() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["add", "Taxes"]);

    let output = run(
        dir.path(),
        &["close-day", "--config-override", "rollover_threshold=1"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Daily Summary"));
    assert!(stdout.contains("! Rollover x1: consider delete, delegate, or rescope \u{201c}Taxes\u{201d}"));
}

#[test]
fn summary_does_not_change_anything() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["add", "Stay put"]);

    let output = run(
        dir.path(),
        &["summary", "--config-override", "summary_format=plain"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Done (0)"));
    assert!(stdout.contains("Stay put"));
    assert!(!stdout.contains('#'));

    let board = run_json(dir.path(), &["list", "today"]);
    assert_eq!(board["open"][0]["rolloverCount"], 0);
}

#[test]
fn events_record_every_mutation() {
    let dir = TempDir::new().unwrap();
    let task = run_json(dir.path(), &["add", "Tracked"]);
    run_json(dir.path(), &["start", task["id"].as_str().unwrap()]);
    run_json(dir.path(), &["close-day"]);

    let events = run_json(dir.path(), &["events"]);
    let mut kinds: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds[..2], ["create", "start"]);
    // Events written by one close can share a timestamp.
    kinds[2..].sort();
    assert_eq!(kinds[2..], ["closeDay", "rollover"]);

    let latest = run_json(dir.path(), &["events", "--limit", "1"]);
    assert_eq!(latest.as_array().unwrap().len(), 1);
}
