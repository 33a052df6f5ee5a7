use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("spawning {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("waiting for generator: {0}")]
    Wait(#[source] std::io::Error),
    #[error("generator exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
    #[error("generator returned an empty reply")]
    Empty,
}

/// Maps a prompt to a reply.
pub trait MessageGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Runs the host's CLI in print mode: `<program> -p <prompt> --output-format text`.
pub struct ClaudeCli {
    program: String,
    timeout: Duration,
    cwd: Option<PathBuf>,
}

impl ClaudeCli {
    pub fn new(program: impl Into<String>, timeout: Duration, cwd: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout,
            cwd,
        }
    }

    fn spawn(&self, prompt: &str) -> Result<Child, GenerateError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-p", prompt, "--output-format", "text"])
            // The nested host fires its own hooks; keep them from re-entering.
            .env("BUMPERS_SKIP", "1")
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.spawn().map_err(|source| GenerateError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    /// Poll until the child exits or the deadline passes. The child is killed
    /// on timeout.
    fn wait_with_deadline(&self, child: &mut Child) -> Result<ExitStatus, GenerateError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(GenerateError::Wait)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GenerateError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full
/// pipe while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl MessageGenerator for ClaudeCli {
    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let started = Instant::now();
        let mut child = self.spawn(prompt)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_with_deadline(&mut child);
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        let status = status?;

        tracing::debug!(
            program = %self.program,
            elapsed_ms = started.elapsed().as_millis() as u64,
            %status,
            "generator finished"
        );
        if !status.success() {
            return Err(GenerateError::Failed {
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        if stdout.trim().is_empty() {
            return Err(GenerateError::Empty);
        }
        Ok(stdout)
    }
}

/// Test double that records prompts and replies from a script.
#[cfg(test)]
pub(crate) struct RecordingGenerator {
    pub prompts: std::cell::RefCell<Vec<String>>,
    reply: Result<String, ()>,
}

#[cfg(test)]
impl RecordingGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            prompts: Default::default(),
            reply: Ok(reply.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            prompts: Default::default(),
            reply: Err(()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

#[cfg(test)]
impl MessageGenerator for RecordingGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.reply
            .clone()
            .map_err(|()| GenerateError::Timeout(Duration::from_secs(30)))
    }
}
