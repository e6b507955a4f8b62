use std::sync::Arc;

use super::runner::{args, CommandOutput, TmuxRunner};
use super::SESSION_PREFIX;
use crate::error::Result;

/// Tmux manager - typed wrappers over the raw runner
#[derive(Clone)]
pub struct TmuxManager {
    runner: Arc<dyn TmuxRunner>,
}

impl std::fmt::Debug for TmuxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmuxManager").finish_non_exhaustive()
    }
}

impl TmuxManager {
    pub fn new(runner: Arc<dyn TmuxRunner>) -> Self {
        Self { runner }
    }

    /// Run an already tokenised command line.
    pub async fn exec(&self, tokens: &[String]) -> Result<CommandOutput> {
        self.runner.run(tokens).await
    }

    /// Check if a session exists
    pub async fn has_session(&self, name: &str) -> bool {
        self.runner
            .run(&args(&["has-session", "-t", &format!("={}", name)]))
            .await
            .map(|o| o.success)
            .unwrap_or(false)
    }

    /// Create a detached session
    pub async fn create_session(&self, name: &str, working_dir: Option<&str>) -> Result<()> {
        let mut cmd = args(&["new-session", "-d", "-s", name]);
        if let Some(dir) = working_dir {
            cmd.extend(args(&["-c", dir]));
        }

        let output = self.runner.run(&cmd).await?;
        if !output.success {
            // If the session already exists, treat it as success.
            if output.stderr.contains("duplicate session") {
                return Ok(());
            }
            return Err(crate::Error::tmux(format!(
                "Failed to create session: {}",
                output.stderr.trim()
            )));
        }

        Ok(())
    }

    /// Kill a tmux session
    pub async fn kill_session(&self, name: &str) -> Result<()> {
        let output = self
            .runner
            .run(&args(&["kill-session", "-t", &format!("={}", name)]))
            .await?;

        if !output.success {
            return Err(crate::Error::tmux(format!(
                "Failed to kill session: {}",
                output.stderr.trim()
            )));
        }

        Ok(())
    }

    /// Capture pane content. `history` includes that many scrollback lines.
    pub async fn capture_pane(&self, target: &str, history: Option<usize>) -> Result<String> {
        let output = self.runner.run(&capture_args(target, history)).await?;
        if !output.success {
            return Ok(String::new());
        }
        Ok(output.stdout)
    }

    /// Like [`capture_pane`](Self::capture_pane) but a tmux-side failure
    /// (unknown pane, no server) is an error instead of empty text.
    pub async fn try_capture_pane(&self, target: &str) -> Result<String> {
        checked_capture(self.runner.run(&capture_args(target, None)).await?)
    }

    /// Blocking capture for synchronous callers.
    pub fn try_capture_pane_blocking(&self, target: &str) -> Result<String> {
        checked_capture(self.runner.run_blocking(&capture_args(target, None))?)
    }

    /// Send literal text to a pane, optionally followed by Enter.
    pub async fn send_literal(&self, target: &str, text: &str, enter: bool) -> Result<()> {
        let output = self
            .runner
            .run(&args(&["send-keys", "-t", target, "-l", text]))
            .await?;
        if !output.success {
            return Err(crate::Error::tmux(format!(
                "Failed to send keys: {}",
                output.stderr.trim()
            )));
        }

        if enter {
            let output = self
                .runner
                .run(&args(&["send-keys", "-t", target, "Enter"]))
                .await?;
            if !output.success {
                return Err(crate::Error::tmux(format!(
                    "Failed to send Enter: {}",
                    output.stderr.trim()
                )));
            }
        }

        Ok(())
    }

    /// Resolve a single pane format variable (e.g. `#{pane_tty}`).
    pub async fn pane_format(&self, target: &str, format: &str) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&args(&["display-message", "-p", "-t", target, format]))
            .await?;

        if !output.success {
            return Ok(None);
        }

        let value = output.stdout.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    /// List agent-managed sessions (names carrying the reserved prefix)
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run(&args(&["list-sessions", "-F", "#{session_name}"]))
            .await?;

        if !output.success {
            // No server running means no sessions.
            return Ok(Vec::new());
        }

        Ok(output
            .stdout
            .lines()
            .filter(|line| line.starts_with(SESSION_PREFIX))
            .map(|s| s.to_string())
            .collect())
    }
}

fn checked_capture(output: CommandOutput) -> Result<String> {
    if !output.success {
        return Err(crate::Error::tmux(format!(
            "capture-pane failed: {}",
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

fn capture_args(target: &str, history: Option<usize>) -> Vec<String> {
    let mut cmd = args(&["capture-pane", "-p", "-J", "-t", target]);
    if let Some(lines) = history {
        cmd.push("-S".to_string());
        cmd.push(format!("-{}", lines));
    }
    cmd
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Scripted runner: records every call and answers from a queue, falling
    /// back to a handler when the queue is empty.
    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: Mutex<Vec<Vec<String>>>,
        pub queued: Mutex<VecDeque<Result<CommandOutput>>>,
        pub handler: Option<Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>>,
    }

    impl FakeRunner {
        pub fn with_handler(
            handler: impl Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Some(Box::new(handler)),
                ..Default::default()
            }
        }

        pub fn push_stdout(&self, stdout: &str) {
            self.queued.lock().push_back(Ok(ok(stdout)));
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().clone()
        }

        fn answer(&self, args: &[String]) -> Result<CommandOutput> {
            self.calls.lock().push(args.to_vec());
            if let Some(next) = self.queued.lock().pop_front() {
                return next;
            }
            Ok(match &self.handler {
                Some(handler) => handler(args),
                None => ok(""),
            })
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[async_trait]
    impl TmuxRunner for FakeRunner {
        async fn run(&self, args: &[String]) -> Result<CommandOutput> {
            self.answer(args)
        }

        fn run_blocking(&self, args: &[String]) -> Result<CommandOutput> {
            self.answer(args)
        }
    }
}
