//! Integration tests for the `modelsync` CLI binary.
//!
//! These tests drive the binary end to end against temporary feed, script
//! and config files; nothing touches the user's real configuration.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `modelsync` binary with env isolation.
fn modelsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("modelsync");
    cmd.env("HOME", "/tmp/modelsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/modelsync-cli-test-nonexistent")
        .env_remove("MODELSYNC_CONFIG")
        .env_remove("MODELSYNC_OUTPUT")
        .env_remove("MODELSYNC_WRITE__TIMEOUT_SECS")
        .env_remove("RUST_LOG");
    cmd
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn json_lines(records: &[Value]) -> String {
    records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn uuid(n: u8) -> String {
    format!("00000000-0000-0000-0000-0000000000{n:02}")
}

fn plan_json(script: &Path, extra: &[&str]) -> std::process::Output {
    modelsync_cmd()
        .arg("plan")
        .arg(script)
        .args(["-o", "json"])
        .args(extra)
        .output()
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = modelsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    modelsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("replay")
            .and(predicate::str::contains("plan"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    modelsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("modelsync"));
}

#[test]
fn test_completions_bash() {
    modelsync_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Replay ──────────────────────────────────────────────────────────

#[test]
fn test_replay_summarizes_feed() {
    let dir = TempDir::new().unwrap();
    let a = uuid(1);
    let b = uuid(2);
    let feed = write_file(
        &dir,
        "feed.jsonl",
        &json_lines(&[
            json!({"op": "upsert", "entity": {"iid": a, "revision": 1, "class_kind": "Category"}}),
            json!({"op": "upsert", "entity": {"iid": a, "revision": 3, "class_kind": "Category"}}),
            json!({"op": "upsert", "entity": {"iid": a, "revision": 2, "class_kind": "Category"}}),
            json!({"op": "upsert", "entity": {"iid": b, "revision": 1, "class_kind": "Category"}}),
            json!({"op": "remove", "iid": b}),
        ]),
    );

    let output = modelsync_cmd()
        .arg("replay")
        .arg(&feed)
        .args(["-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary = stdout_json(&output);
    assert_eq!(summary["records"], 5);
    assert_eq!(summary["added"], 2);
    assert_eq!(summary["updated"], 1);
    assert_eq!(summary["ignored"], 1);
    assert_eq!(summary["removed"], 1);
    assert_eq!(summary["immediate_events"], 4);
    assert_eq!(summary["queued_events"], 4);
    assert_eq!(summary["cached"], 1);
}

#[test]
fn test_replay_table_output() {
    let dir = TempDir::new().unwrap();
    let feed = write_file(
        &dir,
        "feed.jsonl",
        &json_lines(&[json!({"op": "upsert", "entity": {"iid": uuid(1), "revision": 1, "class_kind": "Option"}})]),
    );
    modelsync_cmd()
        .arg("replay")
        .arg(&feed)
        .args(["--color", "never"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added").and(predicate::str::contains("queued events")));
}

#[test]
fn test_replay_malformed_line_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let feed = write_file(
        &dir,
        "feed.jsonl",
        &format!(
            "{}\n{{\"op\":\"explode\"}}\n",
            json!({"op": "remove", "iid": uuid(1)})
        ),
    );
    modelsync_cmd()
        .arg("replay")
        .arg(&feed)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_replay_missing_file_fails() {
    modelsync_cmd()
        .args(["replay", "/tmp/modelsync-cli-test-nonexistent/feed.jsonl"])
        .assert()
        .code(1);
}

// ── Plan ────────────────────────────────────────────────────────────

#[test]
fn test_plan_orders_cyclic_creates() {
    let dir = TempDir::new().unwrap();
    let (x, y) = (uuid(1), uuid(2));
    let script = write_file(
        &dir,
        "script.json",
        &json!({
            "edits": [
                {"action": "create", "entity": {"iid": x, "class_kind": "Term", "links": {"see_also": [y]}}},
                {"action": "create", "entity": {"iid": y, "class_kind": "Term", "links": {"see_also": [x]}}}
            ]
        })
        .to_string(),
    );

    let output = plan_json(&script, &[]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let plan = stdout_json(&output);
    let ops = plan["batch"]["operations"].as_array().unwrap();
    let kinds: Vec<_> = ops.iter().map(|op| op["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["create", "create", "update"]);
    assert_eq!(ops[0]["deferred_references"], json!([y]));
    assert_eq!(plan["summary"]["deferred"], 1);
    assert!(plan.get("receipt").is_none());
}

#[test]
fn test_plan_apply_commits_batch() {
    let dir = TempDir::new().unwrap();
    let p = uuid(3);
    let script = write_file(
        &dir,
        "script.json",
        &json!({
            "cache": [{"iid": p, "revision": 7, "class_kind": "Parameter", "fields": {"name": "mass"}}],
            "edits": [{"action": "set", "iid": p, "field": "name", "value": "weight"}]
        })
        .to_string(),
    );

    let output = plan_json(&script, &["--apply"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let plan = stdout_json(&output);
    assert_eq!(plan["batch"]["operations"][0]["token"], 7);
    assert_eq!(plan["receipt"]["committed"][0]["revision"], 8);
}

#[test]
fn test_plan_unknown_entity_is_not_found() {
    let dir = TempDir::new().unwrap();
    let script = write_file(
        &dir,
        "script.json",
        &json!({"edits": [{"action": "delete", "iid": uuid(9)}]}).to_string(),
    );
    modelsync_cmd()
        .arg("plan")
        .arg(&script)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_plan_duplicate_create_is_conflict() {
    let dir = TempDir::new().unwrap();
    let p = uuid(4);
    let script = write_file(
        &dir,
        "script.json",
        &json!({
            "cache": [{"iid": p, "revision": 1, "class_kind": "Category"}],
            "edits": [{"action": "create", "entity": {"iid": p, "class_kind": "Category"}}]
        })
        .to_string(),
    );
    modelsync_cmd().arg("plan").arg(&script).assert().code(6);
}

#[test]
fn test_plan_invalid_script_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let script = write_file(&dir, "script.json", "{\"edits\": 3}");
    modelsync_cmd().arg("plan").arg(&script).assert().code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    modelsync_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    modelsync_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    modelsync_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    modelsync_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_show_merges_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "config.toml", "[write]\ntimeout_secs = 10\n");
    let output = modelsync_cmd()
        .arg("--config")
        .arg(&path)
        .env("MODELSYNC_BUS__QUEUE_WARNING", "64")
        .args(["config", "show", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let cfg = stdout_json(&output);
    assert_eq!(cfg["write"]["timeout_secs"], 10);
    assert_eq!(cfg["bus"]["queue_warning"], 64);
    assert_eq!(cfg["cache"]["initial_capacity"], 1024);
}

#[test]
fn test_invalid_config_rejects_commands() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "config.toml", "[cache]\nshard_amount = 3\n");
    let feed = write_file(&dir, "feed.jsonl", "");
    modelsync_cmd()
        .arg("--config")
        .arg(&config)
        .arg("replay")
        .arg(&feed)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("shard_amount"));
}
