//! In-memory run store

use async_trait::async_trait;
use gridsweep_core::{SweepError, SweepResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::traits::RunStore;

#[derive(Debug, Default)]
struct MemoryState {
    dirs: HashSet<PathBuf>,
    files: HashMap<PathBuf, String>,
    fail_writes: bool,
}

/// Run store that keeps directories and files in memory
///
/// Writes require the parent directory to have been created, like a real
/// filesystem would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a file (and its parent directories) directly
    pub fn insert_file(&self, path: impl Into<PathBuf>, content: &str) {
        let path = path.into();
        let mut state = self.lock();
        for ancestor in path.ancestors().skip(1) {
            state.dirs.insert(ancestor.to_path_buf());
        }
        state.files.insert(path, content.to_string());
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Content of a file, if present
    pub fn read(&self, path: &Path) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    /// Whether a directory was created
    pub fn has_dir(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Paths of all files, sorted
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.lock().files.keys().cloned().collect();
        files.sort();
        files
    }

    fn write(&self, path: &Path, content: &str) -> SweepResult<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(SweepError::Storage(format!(
                "write to {} rejected",
                path.display()
            )));
        }
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !parent.as_os_str().is_empty() && !state.dirs.contains(parent) {
            return Err(SweepError::Storage(format!(
                "directory {} does not exist",
                parent.display()
            )));
        }
        state.files.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_dir_all(&self, path: &Path) -> SweepResult<()> {
        let mut state = self.lock();
        for dir in path.ancestors() {
            if !dir.as_os_str().is_empty() {
                state.dirs.insert(dir.to_path_buf());
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &Path) -> SweepResult<bool> {
        let state = self.lock();
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn write_marker(&self, path: &Path) -> SweepResult<()> {
        self.write(path, "")
    }

    async fn write_text(&self, path: &Path, content: &str) -> SweepResult<()> {
        self.write(path, content)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
