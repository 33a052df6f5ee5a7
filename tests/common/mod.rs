#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A git work tree with a `bumpers.yml`, plus a private data directory.
/// Both temp dirs must be kept alive for the duration of the test.
pub struct Sandbox {
    pub repo: tempfile::TempDir,
    pub data: tempfile::TempDir,
    pub session_id: String,
    envs: Vec<(String, String)>,
}

impl Sandbox {
    pub fn new(config_yaml: &str) -> Self {
        let repo = tempfile::tempdir().unwrap();
        git2::Repository::init(repo.path()).unwrap();
        fs::write(repo.path().join("bumpers.yml"), config_yaml).unwrap();
        Self {
            repo,
            data: tempfile::tempdir().unwrap(),
            session_id: uuid::Uuid::new_v4().to_string(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn cwd(&self) -> &Path {
        self.repo.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.repo.path().join(rel);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Splice the common hook fields into `fields` (a JSON object body
    /// without braces) and run the binary.
    pub fn hook(&self, fields: &str) -> (i32, String, String) {
        let input = format!(
            r#"{{
    "session_id": "{}",
    "cwd": {},
    "permission_mode": "default",
    {fields}
}}"#,
            self.session_id,
            serde_json::to_string(&self.cwd().to_string_lossy()).unwrap()
        );
        self.run(&input)
    }

    pub fn run(&self, stdin: impl AsRef<[u8]>) -> (i32, String, String) {
        run_cli_in(self.cwd(), stdin, &self.base_envs())
    }

    fn base_envs(&self) -> Vec<(String, String)> {
        let mut envs = vec![
            (
                "BUMPERS_DATA_DIR".to_string(),
                self.data.path().to_string_lossy().into_owned(),
            ),
            (
                "BUMPERS_CLAUDE_BIN".to_string(),
                "/nonexistent/claude-for-bumpers-tests".to_string(),
            ),
        ];
        envs.extend(self.envs.iter().cloned());
        envs
    }
}

pub fn run_cli_in(
    cwd: &Path,
    stdin: impl AsRef<[u8]>,
    envs: &[(String, String)],
) -> (i32, String, String) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bumpers"));
    cmd.current_dir(cwd)
        .env_remove("BUMPERS_SKIP")
        .env_remove("BUMPERS_LOG")
        .env_remove("BUMPERS_CONFIG")
        .env_remove("BUMPERS_DATA_DIR")
        .env_remove("BUMPERS_CLAUDE_BIN")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let mut child = cmd.spawn().expect("failed to spawn binary");

    // The binary may exit before draining stdin; a broken pipe is fine.
    let _ = child.stdin.take().unwrap().write_all(stdin.as_ref());

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Write an executable stand-in for the host CLI that records each call in
/// `calls` and prints `reply`.
#[cfg(unix)]
pub fn fake_claude(dir: &Path, reply: &str) -> (PathBuf, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let calls = dir.join("calls.log");
    let script = dir.join("fake-claude");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\necho call >> '{}'\nprintf '%s\\n' '{}'\n",
            calls.display(),
            reply
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (script, calls)
}

pub fn call_count(calls: &Path) -> usize {
    fs::read_to_string(calls)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}
