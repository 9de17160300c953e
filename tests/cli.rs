use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::tempdir;

fn run(dir: &Path, args: &[&str]) -> Output {
    let binary = assert_cmd::cargo::cargo_bin!("issue-migrate");
    let mut cmd = Command::new(binary);
    cmd.current_dir(dir);
    cmd.env("NO_COLOR", "1");
    cmd.arg("--format").arg("json");
    cmd.args(args);
    cmd.output().expect("issue-migrate executes")
}

fn run_ok(dir: &Path, args: &[&str]) -> Vec<Value> {
    let output = run(dir, args);
    assert!(
        output.status.success(),
        "issue-migrate {:?} failed:\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    json_lines(&output)
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("stdout line is json"))
        .collect()
}

/// Seeded store plus a config pointing at it.
fn setup(dir: &Path) {
    let seed = json!({
        "fields": [
            {"id": "customfield_9", "name": "RFE #"},
            {"id": "customfield_1", "name": "Product"},
            {"id": "resolution", "name": "Resolution"}
        ],
        "create_meta": {"IFR": {"New Feature": {
            "summary": {"name": "Summary", "required": true, "schema": {"type": "string"}},
            "versions": {"name": "Affects versions", "required": false,
                         "schema": {"type": "array", "items": "version"},
                         "allowedValues": [{"id": "1", "name": "8.6.5"}]},
            "components": {"name": "Components", "required": false,
                           "schema": {"type": "array", "items": "component"},
                           "allowedValues": [{"id": "2", "name": "DNS"}]},
            "customfield_1": {"name": "Product", "required": true, "schema": {"type": "option"},
                              "allowedValues": [{"id": "3", "value": "NIOS"}]},
            "customfield_9": {"name": "RFE #", "required": false, "schema": {"type": "string"}}
        }}},
        "users": [
            {"account_id": "acc-1", "display_name": "Alice", "email": "alice@example.com"},
            {"account_id": "acc-2", "display_name": "Bob", "email": "bob@example.com"}
        ],
        "transitions": [
            {"id": "21", "name": "Close", "to": "Closed",
             "fields": {"resolution": [{"id": "7", "label": "Won't Do"}]}}
        ],
        "records": [
            {
                "key": "RFE-42", "project": "RFE", "issue_type": "Feature Request",
                "summary": "Widget support", "description": "\nNeeds widgets\n",
                "reporter": {"account_id": "acc-1"},
                "versions": ["8.6.5"], "components": ["GUI"],
                "comments": [{"author": "Bob", "author_id": "acc-2",
                              "created": "2024-05-02T10:11:12Z", "body": "+1"}]
            },
            {
                "key": "RFE-43", "project": "RFE", "issue_type": "Feature Request",
                "summary": "Gadget support", "versions": ["9.0-beta"]
            }
        ]
    });
    let seed_path = dir.join("seed.json");
    fs::write(&seed_path, serde_json::to_string_pretty(&seed).unwrap()).unwrap();
    run_ok(dir, &["init-store", "store", "--seed", "seed.json"]);

    let config = format!(
        "tracker:\n  server: file://{}\nmigration:\n  source_kind: RFE\n  destination_project: IFR\n",
        dir.join("store").display()
    );
    fs::write(dir.join("migrate.yaml"), config).unwrap();
}

#[test]
fn migrate_then_rerun_skips() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let lines = run_ok(dir.path(), &["migrate", "RFE-42", "RFE-43"]);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["outcome"], "created");
    assert_eq!(lines[0]["destination"], "IFR-1");
    assert_eq!(lines[1]["destination"], "IFR-2");
    assert_eq!(lines[2], json!({"succeeded": 2, "total": 2}));

    let record: Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("store/records/IFR-1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["description"], "Needs widgets");
    assert_eq!(record["versions"], json!(["8.6.5"]));
    assert_eq!(record["components"], json!(["Unknown"]));
    assert_eq!(record["reporter"]["account_id"], "acc-1");
    assert_eq!(record["fields"]["customfield_9"]["value"], "RFE-42");

    let other: Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("store/records/IFR-2.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(other["versions"], json!(["Unknown"]));

    let lines = run_ok(dir.path(), &["migrate", "RFE-42"]);
    assert_eq!(
        lines[0],
        json!({"outcome": "skipped", "source": "RFE-42", "existing": "IFR-1"})
    );
    assert!(!dir.path().join("store/records/IFR-3.json").exists());
}

#[test]
fn migrate_reads_keys_from_file_and_fails_batch_on_missing_source() {
    let dir = tempdir().unwrap();
    setup(dir.path());
    fs::write(dir.path().join("keys.txt"), "# batch one\nRFE-42\n\nRFE-404\n").unwrap();

    let output = run(dir.path(), &["migrate", "--file", "keys.txt"]);
    assert!(!output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["outcome"], "created");
    assert_eq!(lines[1]["outcome"], "failed");
    assert_eq!(lines[1]["stage"], "fetch");
    assert_eq!(lines[2], json!({"succeeded": 1, "total": 2}));

    let err: Value = serde_json::from_slice(
        String::from_utf8_lossy(&output.stderr)
            .lines()
            .last()
            .unwrap()
            .as_bytes(),
    )
    .unwrap();
    assert_eq!(err["error"], "batch_failed");
}

#[test]
fn dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let lines = run_ok(dir.path(), &["migrate", "--dry-run", "RFE-43"]);
    assert_eq!(lines[0]["source"], "RFE-43");
    assert_eq!(lines[0]["payload"]["customfield_1"], json!({"value": "Not defined in RFE"}));
    assert_eq!(lines[0]["payload"]["versions"], json!([{"name": "Unknown"}]));
    assert!(!dir.path().join("store/records/IFR-1.json").exists());
}

#[test]
fn dry_run_reports_missing_source_and_keeps_going() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let output = run(dir.path(), &["migrate", "--dry-run", "RFE-404", "RFE-43"]);
    assert!(!output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["key"], "RFE-404");
    assert_eq!(lines[0]["ok"], false);
    assert_eq!(lines[1]["source"], "RFE-43");
    assert_eq!(lines[1]["payload"]["summary"], "Gadget support");
    assert_eq!(lines[2], json!({"succeeded": 1, "total": 2}));
    assert!(String::from_utf8_lossy(&output.stderr).contains("batch_failed"));
    assert!(!dir.path().join("store/records/IFR-1.json").exists());
}

#[test]
fn transition_closes_with_resolution() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let lines = run_ok(
        dir.path(),
        &["transition", "RFE-43", "--resolution", "Won't Do", "--comment", "dup"],
    );
    assert_eq!(lines[0]["ok"], true);
    assert_eq!(lines[0]["detail"], "Closed");

    let lines = run_ok(dir.path(), &["status", "RFE-43"]);
    assert_eq!(lines[0]["detail"], "Closed");

    let output = run(dir.path(), &["transition", "RFE-42", "--to", "Reopen"]);
    assert!(!output.status.success());
}

#[test]
fn reporter_copied_back_from_source() {
    let dir = tempdir().unwrap();
    setup(dir.path());
    fs::write(
        dir.path().join("migrate.yaml"),
        format!(
            "tracker:\n  server: file://{}\nmigration:\n  copy_reporter: false\n",
            dir.path().join("store").display()
        ),
    )
    .unwrap();

    run_ok(dir.path(), &["migrate", "RFE-42"]);
    let lines = run_ok(dir.path(), &["show", "IFR-1"]);
    assert!(lines[0].get("reporter").is_none());

    let lines = run_ok(dir.path(), &["copy-reporters", "IFR-1"]);
    assert_eq!(lines[0]["detail"], "RFE-42");
    let lines = run_ok(dir.path(), &["show", "IFR-1"]);
    assert_eq!(lines[0]["reporter"]["account_id"], "acc-1");

    run_ok(dir.path(), &["update-reporter", "IFR-1", "--email", "bob@example.com"]);
    let lines = run_ok(dir.path(), &["show", "IFR-1"]);
    assert_eq!(lines[0]["reporter"]["account_id"], "acc-2");
}

#[test]
fn schema_lists_destination_fields() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let lines = run_ok(dir.path(), &["schema", "--required"]);
    let names: Vec<&str> = lines[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Product", "Summary"]);
}

#[test]
fn missing_config_reports_error_code() {
    let dir = tempdir().unwrap();
    let binary = assert_cmd::cargo::cargo_bin!("issue-migrate");
    assert_cmd::Command::new(binary)
        .current_dir(dir.path())
        .args(["--format", "json", "show", "RFE-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(r#""error":"config_not_found""#));
}

#[test]
fn missing_record_fails_show() {
    let dir = tempdir().unwrap();
    setup(dir.path());
    let output = run(dir.path(), &["show", "RFE-999"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("record_not_found"));
}
