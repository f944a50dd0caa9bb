//! CLI integration tests.
//!
//! These run the binary as a process. Queue tests use the in-process
//! `memory://` broker; direct relay tests only cover failures, so no
//! external service is needed.

use std::process::Command;

/// Runs the CLI binary with args and captures output.
/// Returns (exit_code, stdout, stderr).
fn run_cli(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_chatrelay"))
        .args(args)
        .env_remove("RUST_LOG")
        .output();

    match output {
        Ok(o) => {
            let code = o.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&o.stdout).to_string();
            let stderr = String::from_utf8_lossy(&o.stderr).to_string();
            (code, stdout, stderr)
        }
        Err(e) => {
            eprintln!("WARNING: could not run binary: {e}");
            (-1, String::new(), e.to_string())
        }
    }
}

fn temp_config(name: &str, body: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("chatrelay-{}-{name}.json", std::process::id()));
    std::fs::write(&path, body).ok();
    path
}

// -----------------------------------------------------------------------
// Clap parsing tests
// -----------------------------------------------------------------------

#[test]
fn help_flag_exits_zero() {
    let (code, stdout, _) = run_cli(&["--help"]);
    assert_eq!(code, 0, "--help should exit 0");
    assert!(stdout.contains("chatrelay"), "help should mention chatrelay");
    assert!(stdout.contains("--broker"));
    assert!(stdout.contains("--peer"));
}

#[test]
fn version_flag_exits_zero() {
    let (code, stdout, _) = run_cli(&["--version"]);
    assert_eq!(code, 0, "--version should exit 0");
    assert!(stdout.contains("chatrelay"));
}

#[test]
fn unknown_command_fails() {
    let (code, _, stderr) = run_cli(&["nonexistent"]);
    assert_ne!(code, 0, "unknown command should fail");
    assert!(
        stderr.contains("error") || stderr.contains("unrecognized"),
        "stderr should indicate error: {stderr}"
    );
}

#[test]
fn send_missing_text_fails() {
    let (code, _, stderr) = run_cli(&["--broker", "memory://", "send"]);
    assert_ne!(code, 0);
    assert!(!stderr.is_empty());
}

#[test]
fn bad_ack_mode_fails() {
    let (code, _, stderr) = run_cli(&["--broker", "memory://", "--ack-mode", "sometimes", "send", "x"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("sometimes"), "stderr: {stderr}");
}

// -----------------------------------------------------------------------
// Configuration errors
// -----------------------------------------------------------------------

#[test]
fn nothing_configured_fails() {
    let (code, _, stderr) = run_cli(&["send", "hello"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("nothing to relay"), "stderr: {stderr}");
}

#[test]
fn bad_peer_fails() {
    let (code, _, stderr) = run_cli(&["--peer", "no-port", "send", "hello"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("host:port"), "stderr: {stderr}");
}

#[test]
fn unsupported_broker_scheme_fails() {
    let (code, _, stderr) = run_cli(&["--broker", "ftp://nowhere", "send", "hello"]);
    assert_eq!(code, 1);
    assert!(!stderr.is_empty());
}

#[test]
fn invalid_config_json_fails() {
    let path = temp_config("invalid", "{ not json");
    let path_str = path.to_string_lossy().to_string();
    let (code, _, stderr) = run_cli(&["--config", &path_str, "send", "hello"]);
    std::fs::remove_file(&path).ok();

    assert_eq!(code, 1);
    assert!(stderr.contains("invalid config JSON"), "stderr: {stderr}");
}

#[test]
fn missing_config_file_fails() {
    let (code, _, stderr) = run_cli(&["--config", "/definitely/not/here.json", "send", "hi"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to read config file"), "stderr: {stderr}");
}

#[test]
fn json_mode_error_is_json() {
    let (code, _, stderr) = run_cli(&["--json", "send", "hello"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("\"error\""), "stderr: {stderr}");
}

// -----------------------------------------------------------------------
// Relay behaviour
// -----------------------------------------------------------------------

#[test]
fn unreachable_peer_fails_startup() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0");
    let Ok(listener) = listener else { return };
    let Ok(dead) = listener.local_addr() else { return };
    drop(listener);
    let peer = dead.to_string();

    let (code, _, stderr) = run_cli(&[
        "--peer",
        &peer,
        "--listen-port",
        "0",
        "--connect-attempts",
        "1",
        "--connect-timeout",
        "500",
        "send",
        "hello",
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("connect"), "stderr: {stderr}");
}

#[test]
fn send_through_memory_queue_echoes_back() {
    let (code, stdout, stderr) = run_cli(&[
        "--user",
        "alice",
        "--broker",
        "memory://",
        "--queue",
        "room",
        "send",
        "hello",
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("alice"), "stdout: {stdout}");
    assert!(stdout.contains("hello"), "stdout: {stdout}");
    assert!(stdout.contains("sent"), "stdout: {stdout}");
}

#[test]
fn config_file_enables_queue() {
    let path = temp_config(
        "queue",
        r#"{ "user": "carol", "queue": { "broker_uri": "memory://", "queue_name": "lobby" } }"#,
    );
    let path_str = path.to_string_lossy().to_string();
    let (code, stdout, stderr) = run_cli(&["--config", &path_str, "--json", "send", "from file"]);
    std::fs::remove_file(&path).ok();

    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("carol"), "stdout: {stdout}");
    assert!(stdout.contains("from file"), "stdout: {stdout}");
    assert!(stdout.contains("\"status\":\"ok\""), "stdout: {stdout}");
}

#[test]
fn blank_user_falls_back_and_send_succeeds() {
    let (code, stdout, _) = run_cli(&["--user", "   ", "--broker", "memory://", "send", "hey"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("hey"));
}
