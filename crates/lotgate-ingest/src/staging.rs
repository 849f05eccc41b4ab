//! Read-only view of the staging directory
//!
//! The transfer channel owns the staging directory; the pipeline only lists
//! it. Names are sorted so every later stage sees the same fragment order the
//! upstream splitter produced (zero-padded sequence suffixes sort lexically).

use crate::error::RunError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sorted snapshot of the regular files present in the staging directory
#[derive(Debug, Clone)]
pub struct StagingSnapshot {
    dir: PathBuf,
    filenames: Vec<String>,
}

impl StagingSnapshot {
    /// List regular files in `dir`, ignoring sub-directories
    pub fn read(dir: &Path) -> Result<Self, RunError> {
        let staging_err = |source| RunError::Staging {
            path: dir.to_path_buf(),
            source,
        };

        let mut filenames = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(staging_err)? {
            let entry = entry.map_err(staging_err)?;
            if !entry.file_type().map_err(staging_err)?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => filenames.push(name),
                Err(raw) => debug!(name = ?raw, "Skipping non UTF-8 filename"),
            }
        }
        filenames.sort();

        debug!(dir = %dir.display(), files = filenames.len(), "Read staging snapshot");
        Ok(Self {
            dir: dir.to_path_buf(),
            filenames,
        })
    }

    /// Build a snapshot from an explicit listing, kept in the given order
    pub fn from_listing(dir: impl Into<PathBuf>, filenames: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            filenames,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }
}
