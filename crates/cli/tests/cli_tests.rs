// End-to-end tests for the `sheetchat` binary.
// Run with: cargo test -p sheetchat-cli --test cli_tests

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A command with its config directory isolated under `home`.
fn sheetchat(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sheetchat"));
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("SHEETCHAT_OPENAI_KEY")
        .env_remove("SHEETCHAT_LOG");
    cmd
}

fn write_sheet(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const INVENTORY: &str = "item,qty\nbolt,10\nnut,30\ngear,20\n";

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

#[test]
fn show_prints_header_and_rows() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);

    let output = sheetchat(dir.path()).args(["show", sheet.to_str().unwrap()]).output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("header: row 1"), "got: {}", out);
    assert!(out.contains("bolt"));
    assert!(out.contains("[3 rows x 2 columns]"));
}

#[test]
fn show_json_detects_header_below_title() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "report.csv", "Inventory report\nitem,qty,price\nbolt,10,0.5\nnut,30,0.1\n");

    let output = sheetchat(dir.path())
        .args(["show", sheet.to_str().unwrap(), "--json"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(json["header_row"], 2);
    assert_eq!(json["shape"], serde_json::json!([2, 3]));
    assert_eq!(json["columns"], serde_json::json!(["item", "qty", "price"]));
    assert_eq!(json["rows"][0][0], "bolt");
    assert_eq!(json["rows"][1][1], 30);
}

#[test]
fn show_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let output = sheetchat(dir.path())
        .args(["show", dir.path().join("nope.csv").to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("error:"));
}

#[test]
fn show_unknown_extension_is_parse_error_with_hint() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.txt", INVENTORY);
    let output = sheetchat(dir.path()).args(["show", sheet.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("hint:"));
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[test]
fn run_writes_replaced_table() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);
    let out_path = dir.path().join("out.csv");

    let output = sheetchat(dir.path())
        .args([
            "run",
            sheet.to_str().unwrap(),
            "--code",
            "return df:head(1)",
            "-o",
            out_path.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("sheet updated: 1 rows x 2 columns"));

    let written = fs::read_to_string(&out_path).unwrap();
    assert!(written.contains("item"));
    assert!(written.contains("bolt"));
    assert!(!written.contains("nut"));
}

#[test]
fn run_scalar_prints_result() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);

    let output = sheetchat(dir.path())
        .args(["run", sheet.to_str().unwrap(), "--code", "return df:sum(\"qty\")"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Result: 60"));
}

#[test]
fn run_failure_exits_with_execution_code() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);

    let output = sheetchat(dir.path())
        .args(["run", sheet.to_str().unwrap(), "--code", "error('boom')"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(20));
    assert!(stderr(&output).contains("boom"));
}

#[test]
fn run_empty_code_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);

    let output = sheetchat(dir.path())
        .args(["run", sheet.to_str().unwrap(), "--code", "   "])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
}

// ---------------------------------------------------------------------------
// ai doctor
// ---------------------------------------------------------------------------

#[test]
fn ai_doctor_reports_disabled_by_default() {
    let dir = TempDir::new().unwrap();

    let output = sheetchat(dir.path()).args(["ai", "doctor", "--json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(10));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(json["status"], "disabled");
    assert_eq!(json["provider"], "none");
}

#[test]
fn ai_doctor_ready_with_env_key() {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join(".config").join("sheetchat");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("settings.json"), r#"{ "ai": { "provider": "openai" } }"#).unwrap();

    let output = sheetchat(dir.path())
        .env("SHEETCHAT_OPENAI_KEY", "sk-test")
        .args(["ai", "doctor", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(json["status"], "ready");
    assert_eq!(json["key_source"], "environment");
}

fn openai_settings(dir: &TempDir, endpoint: &str) {
    let config_dir = dir.path().join(".config").join("sheetchat");
    fs::create_dir_all(&config_dir).unwrap();
    let settings = serde_json::json!({ "ai": { "provider": "openai", "endpoint": endpoint } });
    fs::write(config_dir.join("settings.json"), settings.to_string()).unwrap();
}

#[test]
fn ai_doctor_test_request_succeeds() {
    use httpmock::prelude::*;

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "ok" } }],
            "usage": { "total_tokens": 7 }
        }));
    });

    let dir = TempDir::new().unwrap();
    openai_settings(&dir, &server.base_url());

    let output = sheetchat(dir.path())
        .env("SHEETCHAT_OPENAI_KEY", "sk-test")
        .args(["ai", "doctor", "--test"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("ok (7 tokens)"));
    mock.assert();
}

#[test]
fn ai_doctor_test_request_rejected_is_model_error() {
    use httpmock::prelude::*;

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(401)
            .json_body(serde_json::json!({ "error": { "message": "bad key" } }));
    });

    let dir = TempDir::new().unwrap();
    openai_settings(&dir, &server.base_url());

    let output = sheetchat(dir.path())
        .env("SHEETCHAT_OPENAI_KEY", "sk-wrong")
        .args(["ai", "doctor", "--test"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(12));
    assert!(stderr(&output).contains("bad key"));
}

// ---------------------------------------------------------------------------
// chat (local commands only)
// ---------------------------------------------------------------------------

#[test]
fn chat_local_commands_edit_and_save() {
    use std::io::Write;
    use std::process::Stdio;

    let dir = TempDir::new().unwrap();
    let sheet = write_sheet(&dir, "inv.csv", INVENTORY);
    let saved = dir.path().join("saved.csv");

    let mut child = sheetchat(dir.path())
        .args(["chat", sheet.to_str().unwrap()])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    {
        let stdin = child.stdin.as_mut().unwrap();
        writeln!(stdin, ":set B2 99").unwrap();
        writeln!(stdin, ":delete-row 4").unwrap();
        writeln!(stdin, ":save {}", saved.display()).unwrap();
        writeln!(stdin, ":quit").unwrap();
    }
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let written = fs::read_to_string(&saved).unwrap();
    assert!(written.contains("bolt,99"), "got: {}", written);
    assert!(!written.contains("gear"));
}
