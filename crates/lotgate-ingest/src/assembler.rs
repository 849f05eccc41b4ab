//! Archive reconstruction
//!
//! Fragments are literal byte ranges of one zip archive. They are appended in
//! staging order to `<work_dir>/<lot_id>.zip`, which is then extracted into
//! `<work_dir>/<lot_id>/`. A wrong order or a missing slice surfaces as a zip
//! structure or CRC error during extraction.

use crate::error::AssemblyError;
use crate::staging::StagingSnapshot;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of a successful assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledLot {
    pub archive: PathBuf,
    pub extract_dir: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    work_dir: PathBuf,
}

impl ArchiveAssembler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn archive_path(&self, lot_id: &str) -> PathBuf {
        self.work_dir.join(format!("{}.zip", lot_id))
    }

    pub fn extract_dir(&self, lot_id: &str) -> PathBuf {
        self.work_dir.join(lot_id)
    }

    /// Concatenate `fragments` in the given order and extract the result
    pub fn assemble(
        &self,
        snapshot: &StagingSnapshot,
        lot_id: &str,
        fragments: &[String],
    ) -> Result<AssembledLot, AssemblyError> {
        if fragments.is_empty() {
            return Err(AssemblyError::NoFragments {
                lot_id: lot_id.to_string(),
            });
        }

        std::fs::create_dir_all(&self.work_dir).map_err(|source| AssemblyError::Io {
            path: self.work_dir.clone(),
            source,
        })?;

        let archive = self.archive_path(lot_id);
        let paths: Vec<PathBuf> = fragments.iter().map(|f| snapshot.path_of(f)).collect();
        let bytes = concatenate(&paths, &archive)?;
        info!(
            archive = %archive.display(),
            fragments = fragments.len(),
            bytes,
            "Reassembled lot archive"
        );

        let extract_dir = self.extract_dir(lot_id);
        let entries = extract(&archive, &extract_dir)?;
        info!(dir = %extract_dir.display(), entries, "Extracted lot archive");

        Ok(AssembledLot {
            archive,
            extract_dir,
            entries,
            bytes,
        })
    }
}

/// Append every file in `parts` to a fresh `target`, returning the byte total
pub fn concatenate(parts: &[PathBuf], target: &Path) -> Result<u64, AssemblyError> {
    let mut out = BufWriter::new(File::create(target).map_err(io_error(target))?);
    let mut total = 0;
    for part in parts {
        let mut input = File::open(part).map_err(io_error(part))?;
        let n = std::io::copy(&mut input, &mut out).map_err(io_error(part))?;
        debug!(fragment = %part.display(), bytes = n, "Appended fragment");
        total += n;
    }
    out.flush().map_err(io_error(target))?;
    Ok(total)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AssemblyError {
    let path = path.to_path_buf();
    move |source| AssemblyError::Io { path, source }
}

/// Extract every entry of `archive` into a clean `dir`
pub fn extract(archive: &Path, dir: &Path) -> Result<usize, AssemblyError> {
    let corrupt = |source| AssemblyError::CorruptArchive {
        path: archive.to_path_buf(),
        source,
    };

    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(io_error(dir))?;
    }
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let file = File::open(archive).map_err(io_error(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(corrupt)?;
    let entries = zip.len();
    zip.extract(dir).map_err(corrupt)?;
    Ok(entries)
}

/// Copies each lot's documents directory to where the ingestion API's
/// `file_relative_url`s resolve
#[derive(Debug, Clone)]
pub struct DocumentPublisher {
    publish_dir: PathBuf,
    documents_subdir: String,
}

impl DocumentPublisher {
    pub fn new(publish_dir: impl Into<PathBuf>, documents_subdir: impl Into<String>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
            documents_subdir: documents_subdir.into(),
        }
    }

    /// Copy `<extract_dir>/<subdir>` to `<publish_dir>/<batch_token>/<subdir>`
    ///
    /// Returns `None` when the lot has no documents directory.
    pub fn publish(
        &self,
        extract_dir: &Path,
        batch_token: &str,
    ) -> Result<Option<PathBuf>, AssemblyError> {
        let from = extract_dir.join(&self.documents_subdir);
        if !from.is_dir() {
            warn!(dir = %from.display(), "Lot has no documents directory; nothing to publish");
            return Ok(None);
        }

        let to = self.publish_dir.join(batch_token).join(&self.documents_subdir);
        let files = copy_dir_all(&from, &to).map_err(|message| AssemblyError::Publish {
            from: from.clone(),
            to: to.clone(),
            message,
        })?;
        info!(to = %to.display(), files, "Published lot documents");
        Ok(Some(to))
    }
}

/// Recursively copy `from` into `to`, returning the number of files copied
pub(crate) fn copy_dir_all(from: &Path, to: &Path) -> Result<usize, String> {
    let mut files = 0;
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| e.to_string())?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| e.to_string())?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| format!("{}: {}", target.display(), e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("{}: {}", parent.display(), e))?;
            }
            std::fs::copy(entry.path(), &target)
                .map_err(|e| format!("{}: {}", entry.path().display(), e))?;
            files += 1;
        }
    }
    Ok(files)
}
