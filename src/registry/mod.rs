mod state;
mod store;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

pub use state::SessionState;
pub use store::{FileStore, MemoryStore, StateStore};

use crate::tmux::{lifecycle, split_commands, tokenize, Lifecycle, TmuxManager, SESSION_PREFIX};

/// Command output, plus the reminder to append for lifecycle commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub output: String,
    pub reminder: Option<String>,
}

impl RecordOutcome {
    /// Output with the reminder appended, as shown to the agent.
    pub fn rendered(&self) -> String {
        match &self.reminder {
            Some(reminder) if self.output.trim().is_empty() => reminder.clone(),
            Some(reminder) => format!("{}\n\n{}", self.output.trim_end(), reminder),
            None => self.output.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub killed: Vec<String>,
    /// Sessions that could not be killed, with the reason. Usually already gone.
    pub failed: Vec<(String, String)>,
}

/// Tracks sessions per conversation id.
///
/// Watches the tmux commands an agent runs, tracks which prefixed sessions it
/// created or killed, and annotates lifecycle command output with a reminder
/// of what is still running. Sessions that die outside its view stay tracked
/// until [`reconcile`](Self::reconcile) or a kill command drops them.
///
/// State is cached in memory and lazily loaded from the store the first time
/// a conversation is touched. Mutating calls for one conversation are
/// expected to be serialised by the caller.
pub struct SessionRegistry {
    store: Arc<dyn StateStore>,
    cache: Mutex<HashMap<String, SessionState>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Tracked names for a conversation, in creation order.
    pub async fn tracked(&self, session_id: &str) -> Vec<String> {
        self.ensure_loaded(session_id).await;
        self.cache
            .lock()
            .get(session_id)
            .map(|s| s.tracked.clone())
            .unwrap_or_default()
    }

    /// Update tracking from a tmux command the agent just ran.
    ///
    /// Mutations are persisted before the reminder is built, so the reminder
    /// always reflects the post-command state. Non-lifecycle commands pass
    /// their output through untouched.
    pub async fn record_event(
        &self,
        session_id: &str,
        raw_command: &str,
        output: &str,
    ) -> RecordOutcome {
        self.record_tokens(session_id, &tokenize(raw_command), output)
            .await
    }

    /// [`record_event`](Self::record_event) for a command that was already
    /// tokenised, so the caller and the registry see the same tokens.
    pub async fn record_tokens(
        &self,
        session_id: &str,
        tokens: &[String],
        output: &str,
    ) -> RecordOutcome {
        let events: Vec<Lifecycle> = split_commands(tokens)
            .iter()
            .map(|command| lifecycle(command))
            .filter(Lifecycle::is_lifecycle)
            .collect();

        if events.is_empty() {
            return RecordOutcome {
                output: output.to_string(),
                reminder: None,
            };
        }

        self.ensure_loaded(session_id).await;

        let mut created = Vec::new();
        let mut untracked = Vec::new();
        let (snapshot, changed) = {
            let mut cache = self.cache.lock();
            let state = cache
                .entry(session_id.to_string())
                .or_insert_with(|| SessionState::new(session_id));

            let mut changed = false;
            for event in &events {
                match event {
                    Lifecycle::Create(Some(name)) => {
                        if state.insert(name) {
                            changed = true;
                            created.push(name.clone());
                        } else if !name.starts_with(SESSION_PREFIX) {
                            untracked.push(name.clone());
                        }
                    }
                    Lifecycle::Kill {
                        target: Some(target),
                        all_but,
                    } => {
                        changed |= if *all_but {
                            state.retain_only(target)
                        } else {
                            state.remove(target)
                        };
                    }
                    Lifecycle::KillAll => changed |= state.clear(),
                    Lifecycle::Create(None) | Lifecycle::Kill { target: None, .. } => {}
                    Lifecycle::Other => {}
                }
            }
            (state.clone(), changed)
        };

        if changed {
            self.persist(&snapshot).await;
        }

        RecordOutcome {
            output: output.to_string(),
            reminder: Some(build_reminder(&snapshot.tracked, &created, &untracked)),
        }
    }

    /// Kill every tracked session (ignoring failures), then forget them and
    /// delete the persisted record.
    pub async fn cleanup_all(&self, session_id: &str, manager: &TmuxManager) -> CleanupReport {
        self.ensure_loaded(session_id).await;
        let names = self
            .cache
            .lock()
            .insert(session_id.to_string(), SessionState::new(session_id))
            .map(|s| s.tracked)
            .unwrap_or_default();

        let mut report = CleanupReport::default();
        for name in names {
            match manager.kill_session(&name).await {
                Ok(()) => report.killed.push(name),
                Err(e) => {
                    tracing::debug!("cleanup: could not kill {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        if let Err(e) = self.store.delete(session_id).await {
            tracing::warn!("cleanup: failed to delete state for {}: {}", session_id, e);
        }

        report
    }

    /// Drop tracked names that no longer exist in tmux. Only runs on demand.
    pub async fn reconcile(&self, session_id: &str, live: &[String]) -> Vec<String> {
        self.ensure_loaded(session_id).await;
        let (snapshot, dropped) = {
            let mut cache = self.cache.lock();
            let Some(state) = cache.get_mut(session_id) else {
                return Vec::new();
            };
            let dropped = state.retain_live(live);
            (state.clone(), dropped)
        };

        if !dropped.is_empty() {
            tracing::debug!("reconcile {}: dropped {:?}", session_id, dropped);
            self.persist(&snapshot).await;
        }
        dropped
    }

    /// Forget the cached state for one conversation. The next access reloads
    /// it from the store.
    pub fn evict(&self, session_id: &str) {
        self.cache.lock().remove(session_id);
    }

    async fn ensure_loaded(&self, session_id: &str) {
        if self.cache.lock().contains_key(session_id) {
            return;
        }
        let loaded = self.load(session_id).await;
        self.cache
            .lock()
            .entry(session_id.to_string())
            .or_insert(loaded);
    }

    /// Read the persisted record. Missing or malformed records start fresh.
    async fn load(&self, session_id: &str) -> SessionState {
        let raw = match self.store.get(session_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionState::new(session_id),
            Err(e) => {
                tracing::warn!("failed to read session state for {}: {}", session_id, e);
                return SessionState::new(session_id);
            }
        };

        match serde_json::from_str::<SessionState>(&raw) {
            Ok(mut state) => {
                state.session_id = session_id.to_string();
                let mut seen = Vec::with_capacity(state.tracked.len());
                for name in state.tracked.drain(..) {
                    if name.starts_with(SESSION_PREFIX) && !seen.contains(&name) {
                        seen.push(name);
                    }
                }
                state.tracked = seen;
                state
            }
            Err(e) => {
                tracing::warn!("ignoring malformed session state for {}: {}", session_id, e);
                SessionState::new(session_id)
            }
        }
    }

    async fn persist(&self, state: &SessionState) {
        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("failed to serialize session state: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(&state.session_id, &json).await {
            tracing::warn!(
                "failed to persist session state for {}: {}",
                state.session_id,
                e
            );
        }
    }
}

fn build_reminder(tracked: &[String], created: &[String], untracked: &[String]) -> String {
    let mut lines = Vec::new();

    if tracked.is_empty() {
        lines.push("No agent-managed tmux sessions are running.".to_string());
    } else {
        lines.push(format!(
            "Agent-managed tmux sessions still running: {}.",
            tracked.join(", ")
        ));
    }

    for name in created {
        lines.push(format!(
            "Session {name} keeps running after this call. Read its output with \
             the capture entry point (`capture {name}`), and end it with \
             `kill-session -t {name}` once it is no longer needed."
        ));
    }

    for name in untracked {
        lines.push(format!(
            "Session {name} does not start with \"{SESSION_PREFIX}\" so it is not tracked \
             and will not be cleaned up automatically."
        ));
    }

    lines.join("\n")
}
