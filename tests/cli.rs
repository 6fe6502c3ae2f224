//! End-to-end tests of the `hivereg` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn hivereg() -> Command {
    Command::cargo_bin("hivereg").unwrap()
}

/// Creates an empty hive in a fresh directory.
fn new_store() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.hiv");
    hivereg()
        .args(["--create", "--store"])
        .arg(&path)
        .args(["add", "\\"])
        .assert()
        .success();
    (dir, path)
}

fn query_json(store: &Path, key: &str) -> serde_json::Value {
    let output = hivereg()
        .arg("/store")
        .arg(store)
        .args(["/json", "query", key])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_lists_commands() {
    hivereg()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("add").and(predicate::str::contains("delete")));
}

#[test]
fn test_missing_store_fails() {
    hivereg()
        .args(["add", "Software"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--store"));
}

#[test]
fn test_add_value_with_windows_switches() {
    let (_dir, store) = new_store();

    hivereg()
        .arg("/store")
        .arg(&store)
        .args(["add", "Software\\App", "/v", "Level", "/t", "REG_DWORD", "/d", "0x10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed successfully"));

    let report = query_json(&store, "Software\\App");
    assert_eq!(report["ok"], true);
    assert_eq!(report["key"]["values"][0]["name"], "Level");
    assert_eq!(report["key"]["values"][0]["type"], "REG_DWORD");
    assert_eq!(report["key"]["values"][0]["raw"], "10000000");
}

#[test]
fn test_missing_type_defaults_to_sz() {
    hivereg()
        .args(["add", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Omitting it stores REG_SZ"));

    let (_dir, store) = new_store();
    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["add", "k", "/v", "name", "/d", "text"])
        .assert()
        .success();

    let report = query_json(&store, "k");
    assert_eq!(report["key"]["values"][0]["type"], "REG_SZ");
    assert_eq!(report["key"]["values"][0]["data"], "text");
}

#[test]
fn test_multi_sz_separator() {
    let (_dir, store) = new_store();

    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["add", "k", "/v", "List", "/t", "multi_sz", "/s", ",", "/d", "a,b"])
        .assert()
        .success();

    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["query", "k", "/v", "List"])
        .assert()
        .success()
        .stdout(predicate::str::contains("REG_MULTI_SZ").and(predicate::str::contains("a, b")));
}

#[test]
fn test_delete_missing_value_reports_json_error() {
    let (_dir, store) = new_store();

    let output = hivereg()
        .arg("--store")
        .arg(&store)
        .args(["--json", "delete", "nowhere", "/v", "x"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["ok"], false);
    assert!(report["error"].as_str().unwrap().contains("nowhere"));

    // The key was not created on the way
    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["query", "nowhere"])
        .assert()
        .failure();
}

#[test]
fn test_delete_key() {
    let (_dir, store) = new_store();

    hivereg().arg("--store").arg(&store).args(["add", "a/b/c"]).assert().success();
    hivereg().arg("--store").arg(&store).args(["delete", "a\\b"]).assert().success();

    let report = query_json(&store, "a");
    assert_eq!(report["key"]["subkeys"], serde_json::json!([]));
}

#[test]
fn test_invalid_binary_data_fails() {
    let (_dir, store) = new_store();

    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["add", "k", "/v", "bin", "/t", "REG_BINARY", "/d", "not base64!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("REG_BINARY"));
}

#[test]
fn test_unsupported_type_fails() {
    let (_dir, store) = new_store();

    hivereg()
        .arg("--store")
        .arg(&store)
        .args(["add", "k", "/v", "l", "/t", "REG_LINK", "/d", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported data type"));
}

#[test]
fn test_query_does_not_modify_file() {
    let (_dir, store) = new_store();
    let before = std::fs::read(&store).unwrap();

    hivereg().arg("--store").arg(&store).args(["query", ""]).assert().success();

    assert_eq!(std::fs::read(&store).unwrap(), before);
}
