use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::fs;

use crate::error::{Error, Result};

const DEFAULT_STALL_SAMPLES: usize = 3;
const DEFAULT_STALL_INTERVAL_MS: u64 = 500;
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 2000;

/// Base directory for config and persisted state (`~/.cea-tmux`).
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| Error::config("Cannot determine home directory"))?;
    Ok(home.join(".cea-tmux"))
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StallConfig {
    samples: Option<usize>,
    interval_ms: Option<u64>,
}

/// Optional `config.json`. Every field has a default.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    stall: StallConfig,
    #[serde(default)]
    detect_timeout_ms: Option<u64>,
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default)]
    tmux_socket: Option<String>,
}

impl ConfigFile {
    /// Load from the default location. A missing file is `Ok(None)`.
    pub async fn load() -> Result<Option<Self>> {
        Self::load_from(&base_dir()?.join("config.json")).await
    }

    pub async fn load_from(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(_) => return Ok(None),
        };
        let cfg = serde_json::from_str::<Self>(&content)?;
        Ok(Some(cfg))
    }

    /// Number of captures taken by the stall detector (at least 1).
    pub fn stall_samples(&self) -> usize {
        self.stall
            .samples
            .unwrap_or(DEFAULT_STALL_SAMPLES)
            .max(1)
    }

    pub fn stall_interval(&self) -> Duration {
        Duration::from_millis(self.stall.interval_ms.unwrap_or(DEFAULT_STALL_INTERVAL_MS))
    }

    /// Hard bound on each introspection subprocess or file read.
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms.unwrap_or(DEFAULT_DETECT_TIMEOUT_MS))
    }

    /// Where per-conversation session records live.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(base_dir()?.join("sessions")),
        }
    }

    /// Dedicated tmux server name (`-L`), if any.
    pub fn tmux_socket(&self) -> Option<&str> {
        self.tmux_socket.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let cfg = ConfigFile::load_from(&dir.path().join("config.json"))
            .await
            .unwrap();
        assert!(cfg.is_none());
    }

    #[tokio::test]
    async fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"stall": {"samples": 5}, "tmux_socket": "cea"}"#)
            .await
            .unwrap();

        let cfg = ConfigFile::load_from(&path).await.unwrap().unwrap();
        assert_eq!(cfg.stall_samples(), 5);
        assert_eq!(cfg.stall_interval(), Duration::from_millis(500));
        assert_eq!(cfg.detect_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.tmux_socket(), Some("cea"));
    }

    #[tokio::test]
    async fn test_malformed_config_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").await.unwrap();
        assert!(ConfigFile::load_from(&path).await.is_err());
    }

    #[test]
    fn test_zero_samples_clamped() {
        let cfg: ConfigFile = serde_json::from_str(r#"{"stall": {"samples": 0}}"#).unwrap();
        assert_eq!(cfg.stall_samples(), 1);
    }
}
