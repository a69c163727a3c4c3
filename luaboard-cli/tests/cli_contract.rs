//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("luaboard");
    cmd.env_remove("LUABOARD_PORT")
        .env_remove("LUABOARD_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("luaboard"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("luaboard"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_includes_usage_examples() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("Examples"));
}

#[test]
fn help_lists_every_command() {
    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--help")
        .output()
        .expect("command should execute");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in [
        "list-ports",
        "info",
        "ls",
        "get",
        "put",
        "run",
        "exec",
        "program",
        "watch",
        "upgrade",
    ] {
        assert!(stdout.contains(name), "help should list {name}");
    }
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output
        .status
        .success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be a single JSON document");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_required_arg() {
    let mut cmd = cli_cmd();
    cmd.arg("exec")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

/// Exit code 1: runtime error
#[test]
fn put_missing_local_file_fails_before_touching_a_port() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("missing.lua");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("put")
        .arg(&missing)
        .arg("/main.lua")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error").and(predicate::str::contains("missing.lua")));
}

#[test]
fn run_and_program_missing_file_exit_one() {
    let dir = tempdir().expect("tempdir should be created");
    for command in ["run", "program"] {
        let mut cmd = cli_cmd();
        cmd.current_dir(dir.path())
            .args([command, "nope.lua"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("nope.lua"));
    }
}

#[test]
fn invalid_port_fails_to_attach() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "info"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("INVALID_PORT_NAME_XYZ"));
}

#[test]
fn non_interactive_flag_is_recognized() {
    let mut cmd = cli_cmd();
    cmd.args(["--non-interactive", "list-ports", "--json"])
        .assert()
        .success();
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("LUABOARD_NON_INTERACTIVE", "true")
        .args(["list-ports", "--json"])
        .assert()
        .success();
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn invalid_local_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("luaboard.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn configured_port_is_used_when_no_flag_given() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("custom.toml");
    fs::write(&config, "[port]\nserial = \"CONFIGURED_PORT_XYZ\"\n").expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("ls")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIGURED_PORT_XYZ"));
}

// ============================================================================
// TTY Detection Tests (colors disabled on non-TTY)
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn errors_are_not_colored_when_not_tty() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["put", "missing.lua", "/main.lua"])
        .output()
        .expect("command should execute");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
    assert!(!stderr.contains("\x1b["));
}
