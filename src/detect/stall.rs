use std::time::Duration;

use serde::Serialize;

use super::Confidence;
use crate::error::{Error, Result};
use crate::tmux::TmuxManager;

pub const DEFAULT_SAMPLES: usize = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of sampling a pane's visible text over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StallResult {
    pub is_stalled: bool,
    pub sample_count: usize,
    /// Adjacent sample pairs that were identical.
    pub unchanged_count: usize,
    /// Last raw capture.
    pub last_output: String,
    pub confidence: Confidence,
    pub detail: String,
    /// Captures that failed and were recorded as empty samples.
    pub capture_failures: usize,
    /// No tmux binary was available, so nothing was sampled at all.
    pub tmux_unavailable: bool,
}

impl StallResult {
    /// Every capture failed, so "unchanged" says nothing about the process.
    pub fn capture_failed(&self) -> bool {
        self.sample_count > 0 && self.capture_failures == self.sample_count
    }
}

/// Classify a series of captures.
///
/// `failures` counts samples that were substituted with an empty string
/// because the capture itself failed.
pub fn classify(samples: &[String], failures: usize, interval: Duration) -> StallResult {
    let n = samples.len();
    let unchanged = samples.windows(2).filter(|w| w[0] == w[1]).count();
    let is_stalled = unchanged + 1 == n.max(1);

    let mut confidence = if is_stalled && n >= 3 {
        Confidence::High
    } else if unchanged * 2 >= n && n > 1 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let span = interval * n.saturating_sub(1) as u32;
    let detail = if n > 0 && failures == n {
        confidence = Confidence::Low;
        format!("pane capture failed for all {} samples; output state unknown", n)
    } else if is_stalled {
        format!(
            "output unchanged across {} samples over {:.1}s",
            n,
            span.as_secs_f64()
        )
    } else {
        format!(
            "output changed in {} of {} intervals over {:.1}s",
            n.saturating_sub(1) - unchanged,
            n.saturating_sub(1),
            span.as_secs_f64()
        )
    };

    StallResult {
        is_stalled,
        sample_count: n,
        unchanged_count: unchanged,
        last_output: samples.last().cloned().unwrap_or_default(),
        confidence,
        detail,
        capture_failures: failures,
        tmux_unavailable: false,
    }
}

/// Captures collected so far by one sampling run.
#[derive(Default)]
struct Captures {
    texts: Vec<String>,
    failures: usize,
    unavailable: bool,
}

impl Captures {
    fn push(&mut self, target: &str, result: Result<String>) {
        match result {
            Ok(text) => self.texts.push(text),
            Err(e) => {
                tracing::debug!("stall sample {} for {} failed: {}", self.texts.len(), target, e);
                self.unavailable |= matches!(e, Error::TmuxUnavailable(_));
                self.failures += 1;
                self.texts.push(String::new());
            }
        }
    }

    fn finish(self, interval: Duration) -> StallResult {
        let mut result = classify(&self.texts, self.failures, interval);
        if self.unavailable && result.capture_failed() {
            result.tmux_unavailable = true;
            result.detail = "tmux unavailable; nothing was sampled".to_string();
        }
        result
    }
}

/// Samples a pane several times and reports whether its text stopped moving.
#[derive(Debug, Clone)]
pub struct StallDetector {
    manager: TmuxManager,
    samples: usize,
    interval: Duration,
}

impl StallDetector {
    pub fn new(manager: TmuxManager) -> Self {
        Self {
            manager,
            samples: DEFAULT_SAMPLES,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sample without blocking the runtime.
    pub async fn sample(&self, target: &str) -> StallResult {
        let mut captures = Captures::default();

        for i in 0..self.samples {
            if i > 0 {
                tokio::time::sleep(self.interval).await;
            }
            captures.push(target, self.manager.try_capture_pane(target).await);
        }

        captures.finish(self.interval)
    }

    /// Sample on the calling thread, for synchronous callers.
    ///
    /// The blocking path never waits on tmux path resolution: warm the
    /// resolver first (`PathResolver::resolve` or `spawn_resolve`), otherwise
    /// the result comes back with `tmux_unavailable` set.
    pub fn sample_blocking(&self, target: &str) -> StallResult {
        let mut captures = Captures::default();

        for i in 0..self.samples {
            if i > 0 {
                std::thread::sleep(self.interval);
            }
            captures.push(target, self.manager.try_capture_pane_blocking(target));
        }

        captures.finish(self.interval)
    }
}
