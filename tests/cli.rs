use std::fs;
use std::process::Command;

fn validate(config: &str) -> (i32, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bumpers.yml");
    fs::write(&path, config).unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_bumpers"))
        .arg("validate")
        .arg("--config")
        .arg(&path)
        .env_remove("BUMPERS_LOG")
        .output()
        .unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
    )
}

#[test]
fn validate_accepts_clean_config() {
    let (code, stdout) = validate(
        r#"
rules:
  - match: "^go test"
    send: "Use just test instead"
commands:
  - name: hello
    send: "hi"
"#,
    );
    assert_eq!(code, 0, "stdout: {stdout}");
    assert!(stdout.contains("1 rules, 1 commands, 0 session notes"), "got: {stdout}");
}

#[test]
fn validate_reports_dropped_entries() {
    let (code, stdout) = validate(
        r#"
rules:
  - match: "(bad"
    send: "x"
commands:
  - name: skip
    send: "reserved"
"#,
    );
    assert_eq!(code, 1);
    assert!(stdout.contains("warning: rule 1:"), "got: {stdout}");
    assert!(stdout.contains("warning: command 1:"), "got: {stdout}");
}
