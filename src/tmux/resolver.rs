use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Locates the tmux binary once and remembers the answer.
///
/// Both success and failure are cached for the lifetime of the resolver, so a
/// missing tmux costs one PATH lookup rather than one per call. Clones share
/// the same cache.
#[derive(Debug, Clone)]
pub struct PathResolver {
    program: String,
    cell: Arc<OnceCell<Option<PathBuf>>>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::for_program("tmux")
    }

    /// Resolve a different executable name (e.g. a wrapper script).
    pub fn for_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// A resolver whose answer is already known. Used by tests and callers
    /// that were handed an explicit path.
    pub fn preresolved(path: Option<PathBuf>) -> Self {
        Self {
            program: "tmux".to_string(),
            cell: Arc::new(OnceCell::new_with(Some(path))),
        }
    }

    /// Resolve (or return the cached) tmux path.
    pub async fn resolve(&self) -> Option<PathBuf> {
        self.cell
            .get_or_init(|| locate(self.program.clone()))
            .await
            .clone()
    }

    /// Kick off resolution in the background so the first real call does not
    /// pay the lookup latency. Returns `None` if the answer is already cached.
    pub fn spawn_resolve(&self) -> Option<JoinHandle<()>> {
        if self.cell.initialized() {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            this.resolve().await;
        }))
    }

    /// Best-effort cached path. Never blocks; `None` if unresolved or missing.
    pub fn cached(&self) -> Option<PathBuf> {
        self.cell.get().cloned().flatten()
    }

    /// Whether a lookup has completed (successfully or not).
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// PATH lookup followed by a `-V` version check.
async fn locate(program: String) -> Option<PathBuf> {
    let lookup = tokio::task::spawn_blocking({
        let program = program.clone();
        move || which::which(program)
    })
    .await;

    let path = match lookup {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            tracing::debug!("{} not found on PATH: {}", program, e);
            return None;
        }
        Err(e) => {
            tracing::warn!("PATH lookup task failed: {}", e);
            return None;
        }
    };

    match tokio::time::timeout(VERSION_CHECK_TIMEOUT, Command::new(&path).arg("-V").output()).await {
        Ok(Ok(out)) if out.status.success() => {
            tracing::debug!(
                "resolved {} ({})",
                path.display(),
                String::from_utf8_lossy(&out.stdout).trim()
            );
            Some(path)
        }
        Ok(Ok(out)) => {
            tracing::warn!(
                "{} -V exited with {}; treating tmux as unavailable",
                path.display(),
                out.status
            );
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("failed to run {} -V: {}", path.display(), e);
            None
        }
        Err(_) => {
            tracing::warn!("{} -V timed out", path.display());
            None
        }
    }
}
