#![cfg(unix)]

mod common;

use common::{Sandbox, call_count, fake_claude};

const ONCE: &str = r#"
rules:
  - match: "^go test"
    send: "Use just test instead"
    generate: once
session:
  - add: "Remember A"
"#;

const GO_TEST: &str = r#""tool_name": "Bash", "tool_input": { "command": "go test ./..." }"#;

fn sandbox_with_fake(tools: &tempfile::TempDir) -> (Sandbox, std::path::PathBuf) {
    let (script, calls) = fake_claude(tools.path(), "Enhanced: be kind");
    let sandbox = Sandbox::new(ONCE).env("BUMPERS_CLAUDE_BIN", &script.to_string_lossy());
    (sandbox, calls)
}

#[test]
fn once_calls_generator_a_single_time() {
    let tools = tempfile::tempdir().unwrap();
    let (sandbox, calls) = sandbox_with_fake(&tools);

    let (code, stdout, stderr) = sandbox.hook(GO_TEST);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(stdout.trim_end(), "Enhanced: be kind");
    assert_eq!(call_count(&calls), 1);

    let (code, stdout, _) = sandbox.hook(GO_TEST);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim_end(), "Enhanced: be kind");
    assert_eq!(call_count(&calls), 1);
}

#[test]
fn session_startup_invalidates_the_cache() {
    let tools = tempfile::tempdir().unwrap();
    let (sandbox, calls) = sandbox_with_fake(&tools);

    sandbox.hook(GO_TEST);
    assert_eq!(call_count(&calls), 1);

    let (code, _, _) = sandbox.hook(r#""source": "startup""#);
    assert_eq!(code, 0);

    sandbox.hook(GO_TEST);
    assert_eq!(call_count(&calls), 2);
}

#[test]
fn resume_keeps_the_cache() {
    let tools = tempfile::tempdir().unwrap();
    let (sandbox, calls) = sandbox_with_fake(&tools);

    sandbox.hook(GO_TEST);
    sandbox.hook(r#""source": "resume""#);
    sandbox.hook(GO_TEST);
    assert_eq!(call_count(&calls), 1);
}

#[test]
fn failing_generator_falls_back_to_template() {
    let sandbox = Sandbox::new(ONCE);
    let (code, stdout, stderr) = sandbox.hook(GO_TEST);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim_end(), "Use just test instead");
    assert!(stderr.contains("enhancement failed"), "got: {stderr}");
}
