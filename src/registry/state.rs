use serde::{Deserialize, Serialize};

use crate::tmux::SESSION_PREFIX;

/// Agent-managed tmux sessions known for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    /// Tracked session names in creation order, without duplicates.
    #[serde(rename = "sessions", default)]
    pub tracked: Vec<String>,
    /// Epoch milliseconds of the last mutation.
    #[serde(default)]
    pub updated_at: i64,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            tracked: Vec::new(),
            updated_at: now_millis(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracked.iter().any(|n| n == name)
    }

    /// Track a name. Unprefixed or already tracked names are ignored.
    pub fn insert(&mut self, name: &str) -> bool {
        if !name.starts_with(SESSION_PREFIX) || self.contains(name) {
            return false;
        }
        self.tracked.push(name.to_string());
        self.touch();
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|n| n != name);
        let changed = self.tracked.len() != before;
        if changed {
            self.touch();
        }
        changed
    }

    /// Drop every tracked name except `keep` (for `kill-session -a`).
    pub fn retain_only(&mut self, keep: &str) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|n| n == keep);
        let changed = self.tracked.len() != before;
        if changed {
            self.touch();
        }
        changed
    }

    /// Drop names not present in `live`; returns what was dropped.
    pub fn retain_live(&mut self, live: &[String]) -> Vec<String> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracked)
            .into_iter()
            .partition(|n| live.contains(n));
        self.tracked = kept;
        if !dropped.is_empty() {
            self.touch();
        }
        dropped
    }

    pub fn clear(&mut self) -> bool {
        if self.tracked.is_empty() {
            return false;
        }
        self.tracked.clear();
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_prefixed_names_are_tracked() {
        let mut state = SessionState::new("conv");
        assert!(state.insert("cea-a"));
        assert!(!state.insert("cea-a"));
        assert!(!state.insert("mine"));
        assert_eq!(state.tracked, vec!["cea-a"]);
    }

    #[test]
    fn test_document_shape() {
        let state = SessionState {
            session_id: "conv-1".into(),
            tracked: vec!["cea-a".into(), "cea-b".into()],
            updated_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sessionId": "conv-1",
                "sessions": ["cea-a", "cea-b"],
                "updatedAt": 1_700_000_000_000i64
            })
        );
    }

    #[test]
    fn test_retain_only() {
        let mut state = SessionState::new("conv");
        state.insert("cea-a");
        state.insert("cea-b");
        assert!(state.retain_only("cea-b"));
        assert_eq!(state.tracked, vec!["cea-b"]);
    }
}
