use std::io::Read;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::resolver::PathResolver;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of one tmux invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout and stderr joined the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    fn from_output(out: std::process::Output) -> Self {
        Self {
            success: out.status.success(),
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        }
    }
}

/// Request/response access to tmux.
///
/// `args` never include the program name or the server socket; the runner
/// adds those. Every call is bounded by the runner's timeout.
#[async_trait]
pub trait TmuxRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<CommandOutput>;

    /// Blocking variant for synchronous callers.
    fn run_blocking(&self, args: &[String]) -> Result<CommandOutput>;
}

/// Runs the real tmux binary as a subprocess.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    resolver: PathResolver,
    socket: Option<String>,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            socket: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Talk to a dedicated server (`tmux -L <name>`).
    pub fn with_socket(mut self, socket: Option<String>) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn full_args<'a>(&'a self, args: &'a [String]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(socket) = &self.socket {
            full.push("-L");
            full.push(socket.as_str());
        }
        full.extend(args.iter().map(String::as_str));
        full
    }
}

#[async_trait]
impl TmuxRunner for ProcessRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let path = self
            .resolver
            .resolve()
            .await
            .ok_or_else(|| Error::unavailable("tmux not found on PATH"))?;

        let mut cmd = Command::new(path);
        cmd.args(self.full_args(args))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(out) => Ok(CommandOutput::from_output(out?)),
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    fn run_blocking(&self, args: &[String]) -> Result<CommandOutput> {
        // Never suspend here: only the cached answer is usable.
        let path = self
            .resolver
            .cached()
            .ok_or_else(|| Error::unavailable("tmux path not resolved"))?;

        let mut child = std::process::Command::new(path)
            .args(self.full_args(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain pipes on their own threads so a large capture can't fill the
        // pipe buffer and wedge the child.
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout(self.timeout));
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let collect = |reader: Option<std::thread::JoinHandle<Vec<u8>>>| {
            reader.and_then(|h| h.join().ok()).unwrap_or_default()
        };

        Ok(CommandOutput::from_output(std::process::Output {
            status,
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
        }))
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Convenience for building argument lists from literals.
pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
