//! CLI arg tests for dbwatch (client)
use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn test_help_mentions_short_and_long_flags() {
    let output = Command::cargo_bin("dbwatch")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("run dbwatch --help");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.status.success());
    assert!(
        text.contains("--once") && text.contains("-1") && text.contains("--changes") && text.contains("-c"),
        "help text missing expected flags (--once/-1, --changes/-c)\n{text}"
    );
}

#[test]
fn test_once_against_missing_agent_fails() {
    // nothing listens on port 1
    let out = Command::cargo_bin("dbwatch")
        .expect("binary exists")
        .args(["--once", "ws://127.0.0.1:1/ws"])
        .output()
        .expect("run dbwatch");
    assert!(!out.status.success(), "expected connect failure");
}
