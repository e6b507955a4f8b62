mod classifier;
mod manager;
mod resolver;
mod runner;
mod tokenizer;

pub use classifier::{canonical, lifecycle, normalize_session_name, subcommand, Lifecycle};
pub use manager::TmuxManager;
pub use resolver::PathResolver;
pub use runner::{args, CommandOutput, ProcessRunner, TmuxRunner};
pub use tokenizer::{split_commands, tokenize};

#[cfg(test)]
pub(crate) use manager::testing;

/// Reserved prefix for agent-managed sessions. Only these are tracked,
/// reminded about, and cleaned up.
pub const SESSION_PREFIX: &str = "cea-";

/// Session used by the shell runner when no target is given.
pub const SHARED_SESSION: &str = "cea-shell";

/// Subcommands the keystroke entry point refuses to run: they read pane or
/// buffer contents back, which belongs to the output-capturing entry point.
pub const BLOCKED_SUBCOMMANDS: &[&str] =
    &["capture-pane", "pipe-pane", "save-buffer", "show-buffer"];

/// Whether a (possibly aliased) subcommand is blocked.
pub fn is_blocked(subcommand: &str) -> bool {
    BLOCKED_SUBCOMMANDS.contains(&canonical(subcommand))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_aliases() {
        assert!(is_blocked("capture-pane"));
        assert!(is_blocked("capturep"));
        assert!(is_blocked("showb"));
        assert!(!is_blocked("send-keys"));
        assert!(!is_blocked(""));
    }
}
