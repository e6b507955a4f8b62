use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::detect::report::{format_timeout, TimeoutContext};
use crate::detect::{DetectionResult, StallDetector, StallResult, TtyDetector};
use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::tmux::{normalize_session_name, TmuxManager, SHARED_SESSION};

const DONE_MARKER: &str = "__CEA_DONE";
const HISTORY_LINES: usize = 2000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pane to run in. Defaults to the shared session.
    pub target: String,
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target: SHARED_SESSION.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        exit_code: i32,
        output: String,
    },
    /// The command is still running. `report` is the merged diagnostic.
    TimedOut {
        report: String,
        stall: StallResult,
        tty: Option<DetectionResult>,
    },
}

/// Runs one shell command to completion inside a persistent tmux pane.
///
/// Completion is detected by a per-run exit marker printed after the command.
/// On timeout the command is left running and both detectors run once to
/// explain what it is doing.
pub struct ShellRunner {
    manager: TmuxManager,
    registry: Arc<SessionRegistry>,
    stall: StallDetector,
    tty: TtyDetector,
    poll_interval: Duration,
}

impl ShellRunner {
    pub fn new(manager: TmuxManager, registry: Arc<SessionRegistry>) -> Self {
        Self {
            stall: StallDetector::new(manager.clone()),
            tty: TtyDetector::new(manager.clone()),
            manager,
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_stall_detector(mut self, stall: StallDetector) -> Self {
        self.stall = stall;
        self
    }

    pub fn with_tty_detector(mut self, tty: TtyDetector) -> Self {
        self.tty = tty;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run(&self, session_id: &str, command: &str, opts: &RunOptions) -> Result<RunOutcome> {
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::InvalidInput("empty command".to_string()));
        }

        let target = opts.target.as_str();
        self.ensure_session(session_id, target).await?;

        let id = run_id();
        let marker = Regex::new(&format!(r"{}_{}:(\d+)", DONE_MARKER, id))
            .map_err(|e| Error::Other(e.to_string()))?;

        tracing::debug!("run {} in {}: {}", id, target, command);
        self.manager
            .send_literal(target, &wrap_command(command, &id), true)
            .await?;

        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let content = self
                .manager
                .capture_pane(target, Some(HISTORY_LINES))
                .await
                .unwrap_or_default();

            if let Some(exit_code) = find_exit_code(&marker, &content) {
                return Ok(RunOutcome::Completed {
                    exit_code,
                    output: extract_output(&content, &id),
                });
            }

            if started.elapsed() >= opts.timeout {
                break;
            }
        }

        let elapsed = started.elapsed();
        tracing::debug!("run {} timed out after {:?}; probing {}", id, elapsed, target);

        let (stall, tty) = tokio::join!(self.stall.sample(target), self.tty.detect(target));
        let report = format_timeout(
            &TimeoutContext {
                command,
                target,
                elapsed,
            },
            &stall,
            tty.as_ref(),
        );

        Ok(RunOutcome::TimedOut { report, stall, tty })
    }

    /// Create the target session if missing, and track it like any other
    /// agent-created session.
    async fn ensure_session(&self, session_id: &str, target: &str) -> Result<()> {
        let session = normalize_session_name(target);
        if self.manager.has_session(&session).await {
            return Ok(());
        }

        self.manager.create_session(&session, None).await?;
        self.registry
            .record_event(session_id, &format!("new-session -d -s {}", session), "")
            .await;
        Ok(())
    }
}

fn run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// The line typed into the shell.
///
/// The command runs under `eval` so its own syntax (a trailing comment, `&&`
/// or `|`, a trailing `&`) cannot swallow or break the marker; a command that
/// does not parse just fails with eval's status. The marker is assembled by
/// `printf`, so the echoed line never contains the finished marker text.
fn wrap_command(command: &str, id: &str) -> String {
    format!(
        "eval {}; printf '\\n{}_%s:%s\\n' {} \"$?\"",
        single_quote(command),
        DONE_MARKER,
        id
    )
}

fn single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn find_exit_code(marker: &Regex, content: &str) -> Option<i32> {
    marker
        .captures_iter(content)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Text between the echoed command line and the exit marker.
fn extract_output(content: &str, id: &str) -> String {
    let finished = format!("{}_{}:", DONE_MARKER, id);
    let lines: Vec<&str> = content.lines().collect();

    let Some(end) = lines.iter().rposition(|l| l.contains(&finished)) else {
        return String::new();
    };
    let start = lines[..end]
        .iter()
        .rposition(|l| l.contains(id))
        .map(|i| i + 1)
        .unwrap_or(0);

    lines[start..end]
        .join("\n")
        .trim_matches('\n')
        .trim_end()
        .to_string()
}
