use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::fs;

use super::Confidence;
use crate::tmux::TmuxManager;

/// Kernel wait channels that mean "sleeping on terminal input or a poll".
const WCHAN_FRAGMENTS: &[&str] = &[
    "n_tty_read",
    "tty_read",
    "wait_woken",
    "poll_schedule_timeout",
    "do_select",
    "core_sys_select",
    "do_sys_poll",
    "ep_poll",
];

/// Kernel stack frames of a process blocked reading its terminal.
const STACK_FRAGMENTS: &[&str] = &[
    "n_tty_read",
    "tty_read",
    "wait_woken",
    "do_select",
    "do_sys_poll",
];

#[cfg(target_arch = "x86_64")]
const READ_SYSCALL: Option<i64> = Some(0);
#[cfg(target_arch = "x86")]
const READ_SYSCALL: Option<i64> = Some(3);
#[cfg(any(target_arch = "aarch64", target_arch = "riscv64"))]
const READ_SYSCALL: Option<i64> = Some(63);
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
const READ_SYSCALL: Option<i64> = None;

/// One piece of evidence about the foreground process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcSignal {
    pub name: &'static str,
    /// What was observed, or `unknown (...)` if it could not be read.
    pub value: String,
    pub indicates_wait: bool,
}

impl ProcSignal {
    fn observed(name: &'static str, value: impl Into<String>, indicates_wait: bool) -> Self {
        Self {
            name,
            value: value.into(),
            indicates_wait,
        }
    }

    fn unknown(name: &'static str, reason: impl std::fmt::Display) -> Self {
        Self {
            name,
            value: format!("unknown ({})", reason),
            indicates_wait: false,
        }
    }
}

/// Verdict on whether a pane's foreground process is waiting for input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub confidence: Confidence,
    pub detail: String,
    pub signals: Vec<ProcSignal>,
    pub pid: u32,
    pub command: String,
}

/// The four input-wait signals, reduced to booleans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalSet {
    pub stdin: bool,
    pub wchan: bool,
    pub stack: bool,
    pub syscall: bool,
}

impl SignalSet {
    pub fn positives(&self) -> usize {
        [self.stdin, self.wchan, self.stack, self.syscall]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

/// Decision table. Rows are checked in order and the first match wins; the
/// order is part of the contract.
///
/// | stdin on pane tty | corroboration                    | result          |
/// |-------------------|----------------------------------|-----------------|
/// | yes               | wchan or stack                   | high, detected  |
/// | yes               | syscall, or 2+ positive signals  | medium, detected|
/// | -                 | any positive signal              | low, detected   |
/// | -                 | none                             | low, not        |
pub fn decide(s: SignalSet) -> (bool, Confidence) {
    if s.stdin && (s.wchan || s.stack) {
        (true, Confidence::High)
    } else if s.stdin && (s.syscall || s.positives() >= 2) {
        (true, Confidence::Medium)
    } else if s.positives() >= 1 {
        (true, Confidence::Low)
    } else {
        (false, Confidence::Low)
    }
}

/// Inspects a pane's foreground process through procfs.
///
/// Only Linux is supported; elsewhere [`detect`](Self::detect) returns `None`.
#[derive(Debug, Clone)]
pub struct TtyDetector {
    manager: TmuxManager,
    proc_root: PathBuf,
    timeout: Duration,
}

impl TtyDetector {
    pub fn new(manager: TmuxManager) -> Self {
        Self {
            manager,
            proc_root: PathBuf::from("/proc"),
            timeout: Duration::from_secs(2),
        }
    }

    /// Read process information from somewhere other than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Bound on each individual lookup.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Judge whether the pane's foreground process is blocked on input.
    ///
    /// `None` means detection is unavailable: unsupported platform, or the
    /// pane tty / foreground process could not be resolved.
    pub async fn detect(&self, target: &str) -> Option<DetectionResult> {
        if !cfg!(target_os = "linux") {
            tracing::debug!("tty detection unsupported on {}", std::env::consts::OS);
            return None;
        }

        let (tty, pane_pid) = self.pane_info(target).await?;
        let pid = self.foreground_pid(pane_pid).await?;
        let proc_dir = self.proc_root.join(pid.to_string());

        let (stdin, wchan, stack, syscall, command) = tokio::join!(
            self.stdin_signal(&proc_dir, &tty),
            self.wchan_signal(&proc_dir),
            self.stack_signal(&proc_dir),
            self.syscall_signal(&proc_dir),
            self.command(&proc_dir),
        );

        let set = SignalSet {
            stdin: stdin.indicates_wait,
            wchan: wchan.indicates_wait,
            stack: stack.indicates_wait,
            syscall: syscall.indicates_wait,
        };
        let (detected, confidence) = decide(set);
        let signals = vec![stdin, wchan, stack, syscall];
        let detail = describe(detected, &signals);

        tracing::debug!(
            "tty detection for {} (pid {}): detected={} confidence={}",
            target,
            pid,
            detected,
            confidence
        );

        Some(DetectionResult {
            detected,
            confidence,
            detail,
            signals,
            pid,
            command,
        })
    }

    async fn pane_info(&self, target: &str) -> Option<(String, u32)> {
        let value = match bounded(
            self.timeout,
            self.manager.pane_format(target, "#{pane_tty} #{pane_pid}"),
        )
        .await
        {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("could not resolve pane tty for {}: {}", target, e);
                return None;
            }
        };

        let mut parts = value.split_whitespace();
        let tty = parts.next()?.to_string();
        let pid = parts.next()?.parse::<u32>().ok()?;
        Some((tty, pid))
    }

    /// The terminal's foreground process group leader, via the pane
    /// process's `tpgid`.
    async fn foreground_pid(&self, pane_pid: u32) -> Option<u32> {
        let stat_path = self.proc_root.join(pane_pid.to_string()).join("stat");
        let stat = bounded(self.timeout, fs::read_to_string(&stat_path))
            .await
            .ok()?;
        let tpgid = parse_tpgid(&stat)?;
        if tpgid <= 0 {
            return None;
        }
        let pid = tpgid as u32;
        let exists = bounded(self.timeout, fs::try_exists(self.proc_root.join(pid.to_string())))
            .await
            .unwrap_or(false);
        exists.then_some(pid)
    }

    async fn stdin_signal(&self, proc_dir: &Path, tty: &str) -> ProcSignal {
        match bounded(self.timeout, fs::read_link(proc_dir.join("fd").join("0"))).await {
            Ok(link) => {
                let matches = link == Path::new(tty);
                ProcSignal::observed("stdin", link.display().to_string(), matches)
            }
            Err(e) => ProcSignal::unknown("stdin", e),
        }
    }

    async fn wchan_signal(&self, proc_dir: &Path) -> ProcSignal {
        match bounded(self.timeout, fs::read_to_string(proc_dir.join("wchan"))).await {
            Ok(raw) => {
                let wchan = raw.trim();
                ProcSignal::observed("wchan", wchan, wchan_matches(wchan))
            }
            Err(e) => ProcSignal::unknown("wchan", e),
        }
    }

    async fn stack_signal(&self, proc_dir: &Path) -> ProcSignal {
        match bounded(self.timeout, fs::read_to_string(proc_dir.join("stack"))).await {
            Ok(raw) => match stack_match(&raw) {
                Some(frame) => ProcSignal::observed("stack", frame, true),
                None => ProcSignal::observed("stack", "no terminal-read frames", false),
            },
            Err(e) => ProcSignal::unknown("stack", e),
        }
    }

    async fn syscall_signal(&self, proc_dir: &Path) -> ProcSignal {
        match bounded(self.timeout, fs::read_to_string(proc_dir.join("syscall"))).await {
            Ok(raw) => {
                let line = raw.trim();
                let summary: String = line.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
                ProcSignal::observed("syscall", summary, syscall_is_stdin_read(line))
            }
            Err(e) => ProcSignal::unknown("syscall", e),
        }
    }

    async fn command(&self, proc_dir: &Path) -> String {
        if let Ok(raw) = bounded(self.timeout, fs::read(proc_dir.join("cmdline"))).await {
            let cmd = raw
                .split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).to_string())
                .collect::<Vec<_>>()
                .join(" ");
            if !cmd.is_empty() {
                return cmd;
            }
        }
        bounded(self.timeout, fs::read_to_string(proc_dir.join("comm")))
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

/// Run one lookup under a hard deadline. Expiry is just another failure.
async fn bounded<T, E, F>(limit: Duration, fut: F) -> std::result::Result<T, String>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

/// `tpgid` from `/proc/<pid>/stat`. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
fn parse_tpgid(stat: &str) -> Option<i32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // state ppid pgrp session tty_nr tpgid
    rest.split_whitespace().nth(5)?.parse().ok()
}

fn wchan_matches(wchan: &str) -> bool {
    wchan != "0" && WCHAN_FRAGMENTS.iter().any(|f| wchan.contains(f))
}

fn stack_match(stack: &str) -> Option<String> {
    stack.lines().find_map(|line| {
        STACK_FRAGMENTS
            .iter()
            .find(|f| line.contains(*f))
            .map(|f| f.to_string())
    })
}

/// `/proc/<pid>/syscall` reads `<nr> <arg0> ...` while blocked in a syscall,
/// or `running` / `-1 ...` otherwise.
fn syscall_is_stdin_read(line: &str) -> bool {
    let Some(read_nr) = READ_SYSCALL else {
        return false;
    };
    let mut fields = line.split_whitespace();
    let Some(nr) = fields.next().and_then(|f| f.parse::<i64>().ok()) else {
        return false;
    };
    let fd = fields
        .next()
        .and_then(|f| i64::from_str_radix(f.trim_start_matches("0x"), 16).ok());
    nr == read_nr && fd == Some(0)
}

fn describe(detected: bool, signals: &[ProcSignal]) -> String {
    let positive: Vec<String> = signals
        .iter()
        .filter(|s| s.indicates_wait)
        .map(|s| format!("{}={}", s.name, s.value))
        .collect();

    if !detected {
        return "no sign of the foreground process reading the terminal".to_string();
    }
    format!("input-wait signals: {}", positive.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(stdin: bool, wchan: bool, stack: bool, syscall: bool) -> SignalSet {
        SignalSet {
            stdin,
            wchan,
            stack,
            syscall,
        }
    }

    #[test]
    fn test_stdin_and_wchan_is_high() {
        assert_eq!(decide(set(true, true, false, false)), (true, Confidence::High));
        assert_eq!(decide(set(true, false, true, false)), (true, Confidence::High));
        assert_eq!(decide(set(true, true, true, true)), (true, Confidence::High));
    }

    #[test]
    fn test_stdin_and_syscall_is_medium() {
        assert_eq!(decide(set(true, false, false, true)), (true, Confidence::Medium));
    }

    #[test]
    fn test_single_signal_is_low_detected() {
        for s in [
            set(true, false, false, false),
            set(false, true, false, false),
            set(false, false, true, false),
            set(false, false, false, true),
        ] {
            assert_eq!(decide(s), (true, Confidence::Low), "{:?}", s);
        }
    }

    #[test]
    fn test_no_signal_is_not_detected() {
        assert_eq!(decide(SignalSet::default()), (false, Confidence::Low));
    }

    #[test]
    fn test_corroboration_without_stdin_stays_low() {
        // Scheduler evidence alone never reaches medium.
        assert_eq!(decide(set(false, true, true, true)), (true, Confidence::Low));
    }

    #[test]
    fn test_parse_tpgid() {
        let stat = "4242 (my (odd) prog) S 4200 4242 4200 34823 4242 4194304 0 0";
        assert_eq!(parse_tpgid(stat), Some(4242));
        assert_eq!(parse_tpgid("garbage"), None);
        assert_eq!(parse_tpgid("1 (init) S 0 1 1 0 -1 0"), Some(-1));
    }

    #[test]
    fn test_wchan_and_stack_matching() {
        assert!(wchan_matches("n_tty_read"));
        assert!(wchan_matches("do_select"));
        assert!(!wchan_matches("0"));
        assert!(!wchan_matches("hrtimer_nanosleep"));

        let stack = "[<0>] wait_woken+0x60/0x90\n[<0>] n_tty_read+0x3a0/0x5c0\n";
        assert_eq!(stack_match(stack).as_deref(), Some("wait_woken"));
        assert_eq!(stack_match("[<0>] futex_wait+0x1/0x2\n"), None);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_syscall_read_on_stdin() {
        assert!(syscall_is_stdin_read("0 0x0 0x7ffd1234 0x1 0x0 0x0 0x0 0x7ffd 0x7f"));
        assert!(!syscall_is_stdin_read("0 0x3 0x7ffd1234 0x1 0x0 0x0 0x0 0x7ffd 0x7f"));
        assert!(!syscall_is_stdin_read("7 0x0 0x1 0x0"));
        assert!(!syscall_is_stdin_read("running"));
        assert!(!syscall_is_stdin_read("-1 0x7ffd 0x7f"));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    mod procfs {
        use std::sync::Arc;

        use super::super::*;
        use crate::tmux::testing::{ok, FakeRunner};
        use crate::tmux::TmuxManager;

        fn fake_proc(root: &Path, pid: u32, files: &[(&str, &str)], stdin: &str) {
            let dir = root.join(pid.to_string());
            std::fs::create_dir_all(dir.join("fd")).unwrap();
            for (name, content) in files {
                std::fs::write(dir.join(name), content).unwrap();
            }
            std::os::unix::fs::symlink(stdin, dir.join("fd").join("0")).unwrap();
        }

        fn detector(root: &Path) -> TtyDetector {
            let fake = Arc::new(FakeRunner::with_handler(|_| ok("/dev/pts/9 100\n")));
            TtyDetector::new(TmuxManager::new(fake)).with_proc_root(root)
        }

        #[tokio::test]
        async fn test_detects_blocked_reader() {
            let dir = tempfile::tempdir().unwrap();
            fake_proc(
                dir.path(),
                100,
                &[("stat", "100 (bash) S 1 100 100 34825 200 0 0"), ("wchan", "do_select")],
                "/dev/pts/9",
            );
            fake_proc(
                dir.path(),
                200,
                &[
                    ("stat", "200 (python3) S 100 200 100 34825 200 0 0"),
                    ("wchan", "n_tty_read"),
                    ("syscall", "0 0x0 0x55d0 0x2000 0x0 0x0 0x0 0x7ffd 0x7f"),
                    ("cmdline", "python3\0-c\0input()\0"),
                ],
                "/dev/pts/9",
            );

            let result = detector(dir.path()).detect("cea-x").await.unwrap();
            assert!(result.detected);
            assert_eq!(result.confidence, Confidence::High);
            assert_eq!(result.pid, 200);
            assert_eq!(result.command, "python3 -c input()");

            // Missing stack file degrades only that signal.
            let stack = result.signals.iter().find(|s| s.name == "stack").unwrap();
            assert!(!stack.indicates_wait);
            assert!(stack.value.starts_with("unknown"));
        }

        #[tokio::test]
        async fn test_busy_process_not_detected() {
            let dir = tempfile::tempdir().unwrap();
            fake_proc(
                dir.path(),
                100,
                &[
                    ("stat", "100 (cargo) R 1 100 100 34825 100 0 0"),
                    ("wchan", "0"),
                    ("syscall", "running"),
                ],
                "/dev/null",
            );

            let result = detector(dir.path()).detect("cea-x").await.unwrap();
            assert!(!result.detected);
            assert_eq!(result.confidence, Confidence::Low);
            assert_eq!(result.command, "");
        }

        #[tokio::test]
        async fn test_unresolvable_foreground_is_unavailable() {
            let dir = tempfile::tempdir().unwrap();
            assert!(detector(dir.path()).detect("cea-x").await.is_none());
        }

        #[tokio::test]
        async fn test_exited_foreground_process_is_unavailable() {
            let dir = tempfile::tempdir().unwrap();
            // tpgid 300 has no /proc entry.
            fake_proc(
                dir.path(),
                100,
                &[("stat", "100 (bash) S 1 100 100 34825 300 0 0")],
                "/dev/pts/9",
            );
            assert!(detector(dir.path()).detect("cea-x").await.is_none());
        }
    }
}
