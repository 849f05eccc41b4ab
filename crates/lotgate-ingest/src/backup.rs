//! Post-run copy of the staging directory

use crate::assembler::copy_dir_all;
use crate::error::RunError;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::info;

#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Copy `staging_dir`, returning where it went
    async fn backup(&self, staging_dir: &Path) -> Result<PathBuf, RunError>;
}

/// Keeps timestamped copies under `<root>/<YYYY>/<YYYY_MM_DD__HH_MM_SS>/`
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    root: PathBuf,
}

impl DirectoryBackup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn target_for(&self, at: NaiveDateTime) -> PathBuf {
        self.root
            .join(at.format("%Y").to_string())
            .join(at.format("%Y_%m_%d__%H_%M_%S").to_string())
    }
}

#[async_trait]
impl BackupSink for DirectoryBackup {
    async fn backup(&self, staging_dir: &Path) -> Result<PathBuf, RunError> {
        let target = self.target_for(Local::now().naive_local());
        let from = staging_dir.to_path_buf();
        let to = target.clone();

        let files = tokio::task::spawn_blocking(move || copy_dir_all(&from, &to))
            .await
            .map_err(|e| RunError::Backup(e.to_string()))?
            .map_err(RunError::Backup)?;

        info!(to = %target.display(), files, "Backed up staging directory");
        Ok(target)
    }
}
