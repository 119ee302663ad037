use crate::names::{validate_file_name, NameError};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Name(#[from] NameError),
}

/// Outcome of one sweep over the workspace root.
#[derive(Debug, Default)]
pub struct ReclaimReport {
    /// Workspaces that were removed
    pub removed: Vec<Utf8PathBuf>,
    /// Workspaces that were old enough but could not be removed
    pub failed: usize,
}

/// Directory holding one workspace per job, named by job id.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: Utf8PathBuf,
}

impl WorkspaceStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the workspace for `job_id` (not created).
    pub fn path_for(&self, job_id: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.root.join(validate_file_name(job_id)?))
    }

    /// Create the workspace for `job_id`, including the root if needed.
    ///
    /// An existing workspace is reused.
    pub fn create(&self, job_id: &str) -> Result<Utf8PathBuf, StoreError> {
        let path = self.path_for(job_id)?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove every workspace whose modification time is older than `max_age`.
    ///
    /// Job status is not consulted. A missing root is not an error, and
    /// failures on one workspace do not stop the sweep.
    pub fn reclaim_stale(&self, max_age: Duration) -> ReclaimReport {
        self.reclaim_stale_at(SystemTime::now(), max_age)
    }

    /// Same as [`reclaim_stale`](Self::reclaim_stale) with an explicit clock.
    pub fn reclaim_stale_at(&self, now: SystemTime, max_age: Duration) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        if !self.root.exists() {
            return report;
        }

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list workspace root {}: {}", self.root, e);
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Failed to read workspace entry: {}", e);
                    continue;
                }
            };
            let path = match Utf8PathBuf::try_from(entry.path()) {
                Ok(p) => p,
                Err(_) => continue,
            };

            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!("Failed to stat workspace {}: {}", path, e);
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            tracing::info!("Removing old job workspace: {}", path);
            match fs::remove_dir_all(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Failed to remove workspace {}: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}
