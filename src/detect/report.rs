use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::{Confidence, DetectionResult, StallResult};

const TAIL_LINES: usize = 20;

/// Merged reading of the stall and tty detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The foreground process looks blocked reading the terminal.
    WaitingForInput(Confidence),
    /// Output stopped changing but nothing points at an input read.
    Stalled,
    /// Output is still changing.
    Working,
    /// The pane could not be captured and the tty check had nothing to say.
    Unknown,
}

/// Combine both detectors. Tty evidence of medium or better wins outright;
/// weaker tty evidence only counts when the output has also stopped moving.
pub fn assess(stall: &StallResult, tty: Option<&DetectionResult>) -> Verdict {
    let tty_detected = tty.filter(|t| t.detected);

    if let Some(t) = tty_detected {
        if t.confidence >= Confidence::Medium {
            return Verdict::WaitingForInput(t.confidence);
        }
    }

    if stall.capture_failed() {
        return match tty_detected {
            Some(t) => Verdict::WaitingForInput(t.confidence),
            None => Verdict::Unknown,
        };
    }

    match (stall.is_stalled, tty_detected) {
        (true, Some(t)) => Verdict::WaitingForInput(t.confidence),
        (true, None) => Verdict::Stalled,
        (false, _) => Verdict::Working,
    }
}

/// What was running when the caller's timeout expired.
#[derive(Debug, Clone)]
pub struct TimeoutContext<'a> {
    pub command: &'a str,
    pub target: &'a str,
    pub elapsed: Duration,
}

/// Build the message shown to the agent when a command outlives its timeout.
pub fn format_timeout(
    ctx: &TimeoutContext<'_>,
    stall: &StallResult,
    tty: Option<&DetectionResult>,
) -> String {
    let verdict = assess(stall, tty);
    let mut out = Vec::new();

    out.push(format!(
        "Command did not finish within {}s in {}: {}",
        ctx.elapsed.as_secs(),
        ctx.target,
        ctx.command
    ));

    out.push(match verdict {
        Verdict::WaitingForInput(c) => {
            format!("Status: likely waiting for input ({} confidence).", c)
        }
        Verdict::Stalled => {
            "Status: output has stopped changing; the command may be waiting for input or hung."
                .to_string()
        }
        Verdict::Working => "Status: output is still changing; the command is likely still working."
            .to_string(),
        Verdict::Unknown if stall.tmux_unavailable => {
            "Status: unknown; tmux is not available.".to_string()
        }
        Verdict::Unknown => "Status: unknown; the pane could not be captured.".to_string(),
    });

    out.push(format!(
        "Output check: {} ({} confidence).",
        stall.detail, stall.confidence
    ));

    out.push(match tty {
        Some(t) => format!(
            "Input check: pid {} `{}`: {} ({} confidence).",
            t.pid,
            if t.command.is_empty() { "?" } else { t.command.as_str() },
            t.detail,
            t.confidence
        ),
        None => "Input check: unavailable for this pane or platform.".to_string(),
    });

    let tail = get_last_lines(&strip_ansi(&stall.last_output), TAIL_LINES);
    if !tail.is_empty() {
        out.push(String::new());
        out.push("Last output:".to_string());
        out.extend(tail);
    }

    out.push(String::new());
    out.push("The command is still running and was not interrupted.".to_string());
    match verdict {
        Verdict::WaitingForInput(_) | Verdict::Stalled => {
            out.push(format!(
                "- Answer a prompt: send-keys -t {} '<text>' Enter",
                ctx.target
            ));
            out.push(format!("- Interrupt it: send-keys -t {} C-c", ctx.target));
        }
        Verdict::Working | Verdict::Unknown => {
            out.push(format!(
                "- Check again later: capture-pane -p -t {}",
                ctx.target
            ));
            out.push(format!("- Interrupt it: send-keys -t {} C-c", ctx.target));
        }
    }

    out.join("\n")
}

/// Strip ANSI escape codes from content
pub fn strip_ansi(content: &str) -> String {
    static ANSI_RE: OnceLock<Regex> = OnceLock::new();
    let re = ANSI_RE.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("valid ANSI regex")
    });
    re.replace_all(content, "").to_string()
}

/// Get last N non-empty lines from content
fn get_last_lines(content: &str, n: usize) -> Vec<String> {
    content
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::stall::{classify, DEFAULT_INTERVAL};

    fn stall(samples: &[&str]) -> StallResult {
        let samples: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        classify(&samples, 0, DEFAULT_INTERVAL)
    }

    fn tty(detected: bool, confidence: Confidence) -> DetectionResult {
        DetectionResult {
            detected,
            confidence,
            detail: "input-wait signals: wchan=n_tty_read".into(),
            signals: Vec::new(),
            pid: 4242,
            command: "python3".into(),
        }
    }

    fn ctx() -> TimeoutContext<'static> {
        TimeoutContext {
            command: "python3 ask.py",
            target: "cea-shell",
            elapsed: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_strong_tty_evidence_wins() {
        let s = stall(&["a", "b", "c"]);
        let t = tty(true, Confidence::High);
        assert_eq!(assess(&s, Some(&t)), Verdict::WaitingForInput(Confidence::High));
    }

    #[test]
    fn test_weak_tty_needs_stall() {
        let t = tty(true, Confidence::Low);
        assert_eq!(assess(&stall(&["a", "b", "c"]), Some(&t)), Verdict::Working);
        assert_eq!(
            assess(&stall(&["a", "a", "a"]), Some(&t)),
            Verdict::WaitingForInput(Confidence::Low)
        );
    }

    #[test]
    fn test_stall_without_tty() {
        assert_eq!(assess(&stall(&["a", "a", "a"]), None), Verdict::Stalled);
        let not_waiting = tty(false, Confidence::Low);
        assert_eq!(
            assess(&stall(&["a", "a", "a"]), Some(&not_waiting)),
            Verdict::Stalled
        );
    }

    #[test]
    fn test_capture_failure_is_unknown() {
        let s = classify(&["".to_string(), "".to_string()], 2, DEFAULT_INTERVAL);
        assert_eq!(assess(&s, None), Verdict::Unknown);
    }

    #[test]
    fn test_format_includes_screen_and_actions() {
        let s = stall(&["Name? ", "Name? ", "\x1b[1mName?\x1b[0m "]);
        let t = tty(true, Confidence::High);
        let msg = format_timeout(&ctx(), &s, Some(&t));

        assert!(msg.contains("within 30s in cea-shell: python3 ask.py"));
        assert!(msg.contains("likely waiting for input (high confidence)"));
        assert!(msg.contains("pid 4242 `python3`"));
        assert!(msg.contains("Last output:\nName? "));
        assert!(msg.contains("send-keys -t cea-shell C-c"));
        assert!(!msg.contains('\x1b'));
    }

    #[test]
    fn test_format_without_tty() {
        let msg = format_timeout(&ctx(), &stall(&["1", "2", "3"]), None);
        assert!(msg.contains("still working"));
        assert!(msg.contains("Input check: unavailable"));
        assert!(msg.contains("capture-pane -p -t cea-shell"));
    }

    #[test]
    fn test_strip_ansi() {
        let input = "\x1b[32mGreen text\x1b[0m";
        assert_eq!(strip_ansi(input), "Green text");
    }
}
