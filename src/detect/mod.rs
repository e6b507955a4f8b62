pub mod report;
pub mod stall;
pub mod tty;

use std::fmt;

use serde::Serialize;

pub use report::{assess, format_timeout, Verdict};
pub use stall::{StallDetector, StallResult};
pub use tty::{DetectionResult, ProcSignal, TtyDetector};

/// How strongly the evidence supports a conclusion. Ordered `Low < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}
