mod common;

use common::{Sandbox, run_cli_in};

#[test]
fn rejects_invalid_json() {
    let sandbox = Sandbox::new("rules: []\n");
    let (code, stdout, stderr) = sandbox.run("not json");
    assert_ne!(code, 0);
    assert!(stdout.is_empty());
    assert!(stderr.contains("parsing hook input"), "got: {stderr}");
}

#[test]
fn missing_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = format!(
        r#"{{ "cwd": {}, "tool_name": "Bash", "tool_input": {{ "command": "ls" }} }}"#,
        serde_json::to_string(&dir.path().to_string_lossy()).unwrap()
    );
    let (code, _, stderr) = run_cli_in(dir.path(), &input, &[]);
    assert_ne!(code, 0);
    assert!(stderr.contains("no bumpers config"), "got: {stderr}");
}

#[test]
fn unparseable_config_is_fatal() {
    let sandbox = Sandbox::new("rules: [unterminated\n");
    let (code, _, stderr) = sandbox.hook(r#""tool_name": "Bash", "tool_input": {}"#);
    assert_ne!(code, 0);
    assert!(stderr.contains("bumpers.yml"), "got: {stderr}");
}

#[test]
fn skip_env_bypasses_everything() {
    let sandbox = Sandbox::new("rules: [unterminated\n").env("BUMPERS_SKIP", "1");
    for input in ["not json", r#"{"tool_name": "Bash", "tool_input": {"command": "go test"}}"#] {
        let (code, stdout, stderr) = sandbox.run(input);
        assert_eq!(code, 0, "stderr: {stderr}");
        assert!(stdout.is_empty());
    }
}

#[test]
fn skip_env_bypasses_non_utf8_input() {
    let sandbox = Sandbox::new("rules: []\n").env("BUMPERS_SKIP", "1");
    let (code, stdout, stderr) = sandbox.run(b"\xff\xfe{");
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.is_empty());
}

#[test]
fn non_utf8_input_is_rejected_without_skip() {
    let sandbox = Sandbox::new("rules: []\n");
    let (code, stdout, stderr) = sandbox.run(b"\xff\xfe{");
    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("parsing hook input"), "stderr: {stderr}");
}

#[test]
fn explicit_config_path_wins() {
    let sandbox = Sandbox::new("rules: []\n");
    let other = sandbox.write(
        "other.toml",
        "[[rules]]\nmatch = \"^ls\"\nsend = \"from toml\"\n",
    );
    let sandbox = sandbox.env("BUMPERS_CONFIG", &other.to_string_lossy());
    let (code, stdout, stderr) =
        sandbox.hook(r#""tool_name": "Bash", "tool_input": { "command": "ls -la" }"#);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(stdout.trim_end(), "from toml");
}

#[test]
fn unwritable_data_dir_degrades_gracefully() {
    let sandbox = Sandbox::new(
        r#"
rules:
  - match: "^go test"
    send: "Use just test instead"
    generate: once
"#,
    );
    let blocker = sandbox.write("not-a-dir", "x");
    let data_dir = blocker.join("data");
    let sandbox = sandbox.env("BUMPERS_DATA_DIR", &data_dir.to_string_lossy());
    let (code, stdout, _) =
        sandbox.hook(r#""tool_name": "Bash", "tool_input": { "command": "go test" }"#);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim_end(), "Use just test instead");
}
