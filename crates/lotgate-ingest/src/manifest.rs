//! Manifest files and their fragment coverage
//!
//! Manifest grammar (plain text, one item per line):
//!
//! ```text
//! <fields...> <checksum> *<fragment filename>     # repeated N times
//! ...
//! <anything...> <N>                               # final non-empty line
//! ```
//!
//! The declared count lives in the last whitespace token of the final
//! non-empty line. Only the first N lines are read as checksum entries.

use crate::classifier::LotClassifier;
use crate::error::ValidationError;
use std::path::Path;
use tracing::debug;

/// One checksum line of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub checksum: String,
    pub filename: String,
}

/// Parsed manifest body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub declared_count: usize,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let content = std::fs::read(path).map_err(|source| ValidationError::MissingFile {
            path: path.to_path_buf(),
            source: source.into(),
        })?;

        Self::parse(&name, &String::from_utf8_lossy(&content))
    }

    pub fn parse(name: &str, content: &str) -> Result<Self, ValidationError> {
        let format_err = |message: String| ValidationError::ManifestFormat {
            manifest: name.to_string(),
            message,
        };

        let lines: Vec<&str> = content.lines().collect();
        let count_line = lines
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| format_err("manifest is empty".to_string()))?;

        let count_token = count_line.split_whitespace().last().unwrap_or_default();
        let declared_count: usize = count_token
            .parse()
            .map_err(|_| format_err(format!("'{}' is not a fragment count", count_token)))?;

        if declared_count > lines.len() {
            return Err(format_err(format!(
                "declares {} entries but has only {} lines",
                declared_count,
                lines.len()
            )));
        }

        let entries = lines[..declared_count]
            .iter()
            .enumerate()
            .map(|(i, line)| {
                parse_entry(line).ok_or_else(|| {
                    format_err(format!("line {} is not a '<checksum> *<file>' entry", i + 1))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(manifest = %name, declared_count, "Parsed manifest");
        Ok(Self {
            name: name.to_string(),
            declared_count,
            entries,
        })
    }

    pub fn checksums(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.checksum.to_lowercase()).collect()
    }
}

/// Checksum is the last field before the first `*`; the filename follows it
fn parse_entry(line: &str) -> Option<ManifestEntry> {
    let (head, filename) = line.split_once('*')?;
    let checksum = head.split_whitespace().last()?;
    Some(ManifestEntry {
        checksum: checksum.to_string(),
        filename: filename.trim().to_string(),
    })
}

/// A manifest and the fragment files whose names start with its prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMapping {
    pub manifest: String,
    pub covered: Vec<String>,
}

impl ManifestMapping {
    /// Fragment prefix, i.e. the manifest name without its suffix
    pub fn prefix<'a>(&'a self, suffix: &str) -> &'a str {
        self.manifest.strip_suffix(suffix).unwrap_or(&self.manifest)
    }
}

/// Pairs manifests with the fragments they cover
#[derive(Debug, Clone)]
pub struct ManifestMatcher {
    classifier: LotClassifier,
}

impl ManifestMatcher {
    pub fn new(classifier: LotClassifier) -> Self {
        Self { classifier }
    }

    /// One mapping per manifest, including manifests that cover nothing
    pub fn match_manifests(&self, filenames: &[String]) -> Vec<ManifestMapping> {
        let suffix = self.classifier.manifest_suffix();
        let fragments: Vec<&String> = filenames
            .iter()
            .filter(|f| self.classifier.is_fragment(f))
            .collect();

        filenames
            .iter()
            .filter(|f| self.classifier.is_manifest(f))
            .map(|manifest| {
                let prefix = manifest.strip_suffix(suffix).unwrap_or(manifest);
                let covered: Vec<String> = fragments
                    .iter()
                    .filter(|f| f.starts_with(prefix))
                    .map(|f| (*f).clone())
                    .collect();
                debug!(%manifest, covered = covered.len(), "Matched manifest");
                ManifestMapping {
                    manifest: manifest.clone(),
                    covered,
                }
            })
            .collect()
    }

    /// Lot identifier of a manifest, read with the fragment naming rule
    pub fn lot_id_of(&self, mapping: &ManifestMapping) -> Option<String> {
        self.classifier.lot_id_of(&mapping.manifest).ok()
    }
}
