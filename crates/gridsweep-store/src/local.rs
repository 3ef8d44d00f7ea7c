//! Local-disk run store

use async_trait::async_trait;
use gridsweep_core::{SweepError, SweepResult};
use std::path::Path;
use tracing::debug;

use crate::traits::RunStore;

/// Run store backed by the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    /// Create a new local store
    pub fn new() -> Self {
        Self
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> SweepError {
    SweepError::Storage(format!("Failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl RunStore for LocalStore {
    async fn create_dir_all(&self, path: &Path) -> SweepResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| storage_error("create directory", path, e))?;
        debug!(path = %path.display(), "Created run directory");
        Ok(())
    }

    async fn exists(&self, path: &Path) -> SweepResult<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| storage_error("inspect", path, e))
    }

    async fn write_marker(&self, path: &Path) -> SweepResult<()> {
        tokio::fs::write(path, b"")
            .await
            .map_err(|e| storage_error("write marker", path, e))
    }

    async fn write_text(&self, path: &Path, content: &str) -> SweepResult<()> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| storage_error("write", path, e))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
