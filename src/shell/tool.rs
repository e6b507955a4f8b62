use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::tmux::{
    canonical, is_blocked, split_commands, subcommand, tokenize, TmuxManager,
};

/// Result of a raw tmux command sent through the keystroke entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Rejected before reaching tmux.
    Blocked { subcommand: String, message: String },
    /// tmux ran; `output` carries any session reminder.
    Completed { success: bool, output: String },
}

/// The keystroke/tmux entry point: runs arbitrary tmux commands on behalf of
/// the agent, except the ones that read pane contents back.
pub struct TmuxTool {
    manager: TmuxManager,
    registry: Arc<SessionRegistry>,
}

impl TmuxTool {
    pub fn new(manager: TmuxManager, registry: Arc<SessionRegistry>) -> Self {
        Self { manager, registry }
    }

    pub async fn execute(&self, session_id: &str, raw: &str) -> Result<ExecOutcome> {
        let mut tokens = tokenize(raw);
        if tokens.first().map(String::as_str) == Some("tmux") {
            tokens.remove(0);
        }
        if tokens.is_empty() {
            return Err(Error::InvalidInput("empty tmux command".to_string()));
        }

        for command in split_commands(&tokens) {
            let sub = subcommand(&command);
            if is_blocked(sub) {
                let sub = canonical(sub).to_string();
                tracing::debug!("rejected blocked subcommand {}", sub);
                let message = blocked_message(&sub);
                return Ok(ExecOutcome::Blocked {
                    subcommand: sub,
                    message,
                });
            }
        }

        let output = self.manager.exec(&tokens).await?;
        let recorded = self
            .registry
            .record_tokens(session_id, &tokens, &output.combined())
            .await;

        Ok(ExecOutcome::Completed {
            success: output.success,
            output: recorded.rendered(),
        })
    }

    /// The output-capturing entry point: visible pane text plus `history`
    /// lines of scrollback.
    pub async fn capture(&self, target: &str, history: Option<usize>) -> Result<String> {
        self.manager.capture_pane(target, history).await
    }
}

fn blocked_message(sub: &str) -> String {
    format!(
        "`{sub}` is not allowed here: this entry point only sends commands and keystrokes. \
         Read pane output with the capture entry point instead."
    )
}
