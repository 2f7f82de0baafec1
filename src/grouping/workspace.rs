use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{GroupSortError, Phase, Result};
use crate::grouping::constants::*;
use crate::grouping::sanitize_key;

/// Directory owned by exactly one pipeline invocation.
///
/// Holds the per-group files under `groups/` and the sorter's runs under
/// `sort/`. [`TempWorkspace::teardown`] removes everything; dropping the value
/// without calling it does the same.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl TempWorkspace {
    pub fn create(temp_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(temp_root)
            .map_err(|e| GroupSortError::io(Phase::Setup, temp_root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(temp_root)
            .map_err(|e| GroupSortError::io(Phase::Setup, temp_root, e))?;
        let path = dir.path().to_path_buf();

        for sub in [GROUPS_DIR_NAME, SORT_DIR_NAME] {
            let sub_path = path.join(sub);
            std::fs::create_dir(&sub_path)
                .map_err(|e| GroupSortError::io(Phase::Setup, &sub_path, e))?;
        }

        debug!("Created workspace {}", path.display());
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unsorted_path(&self, index: usize, key: &str) -> PathBuf {
        self.group_path(index, key, UNSORTED_SUFFIX)
    }

    pub fn sorted_path(&self, index: usize, key: &str) -> PathBuf {
        self.group_path(index, key, SORTED_SUFFIX)
    }

    /// Scratch directory for the runs of one group's sort.
    pub fn sort_dir(&self, index: usize) -> PathBuf {
        self.path.join(SORT_DIR_NAME).join(format!("g{:06}", index))
    }

    // The discovery index keeps keys that sanitize alike apart.
    fn group_path(&self, index: usize, key: &str, suffix: &str) -> PathBuf {
        self.path.join(GROUPS_DIR_NAME).join(format!(
            "{:06}_{}{}{}",
            index,
            sanitize_key(key),
            suffix,
            GROUP_FILE_EXTENSION
        ))
    }

    /// Delete the workspace. Individual failures are logged, never raised.
    pub fn teardown(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        remove_files(dir.path());
        if let Err(e) = dir.close() {
            warn!("Failed to remove workspace {}: {}", self.path.display(), e);
        } else {
            debug!("Removed workspace {}", self.path.display());
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_files(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_files(&path);
        } else if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
