use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cea-tmux")]
#[command(version, about = "Agent-safe tmux tooling: guarded commands, session tracking, stall and input-wait detection", long_about = None)]
pub struct Args {
    /// Conversation id that owns tracked sessions
    #[arg(
        short,
        long,
        global = true,
        env = "CEA_CONVERSATION_ID",
        default_value = "default"
    )]
    pub conversation: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a raw tmux command (pane-reading subcommands are rejected)
    Exec {
        /// tmux arguments, optionally starting with `tmux`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        raw: Vec<String>,
    },

    /// Print a pane's contents
    Capture {
        target: String,

        /// Lines of scrollback to include
        #[arg(long)]
        history: Option<usize>,
    },

    /// Run a shell command in a persistent pane and wait for it
    Run {
        command: String,

        /// Seconds to wait before reporting on the still-running command
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,

        /// Pane to run in (default: the shared session)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Check whether a pane's foreground process is waiting for input
    Detect {
        target: String,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Sample a pane and report whether its output has stopped changing
    Stall {
        target: String,

        #[arg(long)]
        samples: Option<usize>,

        #[arg(long)]
        interval_ms: Option<u64>,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// List sessions tracked for the conversation
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Drop tracked sessions that no longer exist in tmux
        #[arg(long)]
        reconcile: bool,
    },

    /// Kill every session tracked for the conversation
    Cleanup,

    /// Show version
    Version,
}
