//! Integration tests for the `stowage` CLI binary.
//!
//! Config and data directories point into a temp dir so tests never touch
//! the user's real configuration. Remote collections are served by
//! wiremock.
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `stowage` binary with env isolation.
fn stowage_cmd(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("stowage");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("STOWAGE_PROFILE")
        .env_remove("STOWAGE_OUTPUT")
        .env_remove("STOWAGE_INSECURE")
        .env_remove("STOWAGE_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn people() -> Value {
    json!([
        {"id": "1", "name": "Ada", "age": 36},
        {"id": "2", "name": "Bob", "age": 50},
        {"id": "3", "name": "Cy", "age": 41}
    ])
}

async fn serve(body: Value, at: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn keys(stdout: &[u8]) -> Vec<String> {
    let rows: Value = serde_json::from_slice(stdout).unwrap();
    rows.as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"].as_str().unwrap().to_owned())
        .collect()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    stowage_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("fetch")
            .and(predicate::str::contains("join"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn version_flag() {
    let home = TempDir::new().unwrap();
    stowage_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stowage"));
}

#[test]
fn completions_zsh() {
    let home = TempDir::new().unwrap();
    stowage_cmd(&home)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_follows_xdg() {
    let home = TempDir::new().unwrap();
    stowage_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_init_then_profiles() {
    let home = TempDir::new().unwrap();
    stowage_cmd(&home)
        .args([
            "config",
            "init",
            "--name",
            "people",
            "--uri",
            "https://api.example.com/people",
            "--key",
            "id",
        ])
        .assert()
        .success();

    stowage_cmd(&home)
        .args(["config", "profiles", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("people"));

    let output = stowage_cmd(&home)
        .args(["config", "init", "--name", "people"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(combined_output(&output).contains("--force"));
}

#[test]
fn config_init_rejects_bad_uri() {
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home)
        .args(["config", "init", "--uri", "not a url"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_output_applies_without_flag() {
    let server = serve(people(), "/people").await;
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home).args(["config", "path"]).output().unwrap();
    let path = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "[defaults]\noutput = \"plain\"\n").unwrap();
    let uri = format!("{}/people", server.uri());

    stowage_cmd(&home)
        .args(["fetch", &uri, "--key", "id"])
        .assert()
        .success()
        .stdout(predicate::eq("1\n2\n3\n"));

    let output = stowage_cmd(&home)
        .args(["fetch", &uri, "--key", "id", "-o", "json"])
        .output()
        .unwrap();
    assert_eq!(keys(&output.stdout), ["1", "2", "3"]);
}

// ── Fetch ───────────────────────────────────────────────────────────

#[test]
fn fetch_without_uri_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home).arg("fetch").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No collection URI"));
}

#[test]
fn fetch_unknown_profile() {
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home)
        .args(["fetch", "--profile", "ghost"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_sorts_records() {
    let server = serve(people(), "/people").await;
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home)
        .args(["fetch", &format!("{}/people", server.uri())])
        .args(["--key", "id", "--sort", "age desc", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(keys(&output.stdout), ["2", "3", "1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_filters_and_finds() {
    let server = serve(people(), "/people").await;
    let home = TempDir::new().unwrap();
    let uri = format!("{}/people", server.uri());

    stowage_cmd(&home)
        .args(["fetch", &uri, "--key", "id", "--where", "age>=40", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::eq("2\n3\n"));

    stowage_cmd(&home)
        .args(["fetch", &uri, "--key", "id", "--find", "ada", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::eq("1\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_unwraps_source_and_renders_table() {
    let server = serve(json!({"data": {"items": people()}}), "/wrapped").await;
    let home = TempDir::new().unwrap();
    stowage_cmd(&home)
        .args(["fetch", &format!("{}/wrapped", server.uri())])
        .args(["--key", "id", "--source", "data.items"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("name")
                .and(predicate::str::contains("Ada"))
                .and(predicate::str::contains("╭")),
        );
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_save_then_restore_offline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people()))
        .expect(1)
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    stowage_cmd(&home)
        .args(["fetch", &format!("{}/people", server.uri())])
        .args(["--key", "id", "--save", "local", "-q"])
        .assert()
        .success();

    let output = stowage_cmd(&home)
        .args(["fetch", "--restore", "local", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(keys(&output.stdout), ["1", "2", "3"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_server_error_exits_nonzero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();
    let output = stowage_cmd(&home)
        .args(["fetch", &format!("{}/people", server.uri())])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("500"));
}

// ── Join ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn join_merges_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(people()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/teams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"tid": "a", "id": "1", "team": "core"},
            {"tid": "b", "id": "2", "team": "web"}
        ])))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();

    let output = stowage_cmd(&home)
        .args([
            "join",
            &format!("{}/people", server.uri()),
            &format!("{}/teams", server.uri()),
            "--on",
            "id",
            "-o",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    let rows: Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Ada");
    assert_eq!(rows[0]["team"], "core");

    stowage_cmd(&home)
        .args([
            "join",
            &format!("{}/people", server.uri()),
            &format!("{}/teams", server.uri()),
            "--on",
            "id",
            "--mode",
            "left",
            "-o",
            "plain",
        ])
        .assert()
        .success()
        .stdout(predicate::eq("1\n2\n3\n"));
}
