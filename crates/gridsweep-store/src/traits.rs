//! Storage trait definitions

use async_trait::async_trait;
use gridsweep_core::SweepResult;
use std::path::Path;

/// Filesystem operations the dispatcher needs for a run's output root
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a directory and its parents; succeeds if it already exists
    async fn create_dir_all(&self, path: &Path) -> SweepResult<()>;

    /// Check whether a file exists
    async fn exists(&self, path: &Path) -> SweepResult<bool>;

    /// Create an empty marker file
    async fn write_marker(&self, path: &Path) -> SweepResult<()>;

    /// Write a text file, replacing any previous content
    async fn write_text(&self, path: &Path, content: &str) -> SweepResult<()>;

    /// Get the store name
    fn name(&self) -> &'static str;
}
