//! Manifest-based integrity verification
//!
//! A lot passes when its manifest declares exactly as many fragments as are
//! present and the declared checksums equal the computed ones as multisets.
//! Neither the order of manifest lines nor the order in which fragments are
//! hashed affects the verdict.

use crate::error::ValidationError;
use crate::manifest::{Manifest, ManifestMapping};
use crate::staging::StagingSnapshot;
use lotgate_common::checksum::{compute_file_checksum, ChecksumAlgorithm};
use std::collections::HashMap;
use tracing::{debug, info};

/// Evidence collected for one manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub manifest: String,
    pub declared_count: usize,
    pub actual_count: usize,
    /// Sorted, lower-case
    pub declared_checksums: Vec<String>,
    /// Sorted, lower-case
    pub computed_checksums: Vec<String>,
}

impl VerificationResult {
    pub fn counts_match(&self) -> bool {
        self.declared_count == self.actual_count
    }

    pub fn checksums_match(&self) -> bool {
        self.declared_checksums == self.computed_checksums
    }

    pub fn passed(&self) -> bool {
        self.counts_match() && self.checksums_match()
    }

    /// Turn a failed result into the matching error
    pub fn into_verdict(self) -> Result<Self, ValidationError> {
        if !self.counts_match() {
            return Err(ValidationError::CountMismatch {
                manifest: self.manifest,
                declared: self.declared_count,
                actual: self.actual_count,
            });
        }
        if !self.checksums_match() {
            let (missing, unexpected) =
                multiset_difference(&self.declared_checksums, &self.computed_checksums);
            return Err(ValidationError::ChecksumMismatch {
                manifest: self.manifest,
                missing,
                unexpected,
            });
        }
        Ok(self)
    }
}

/// Checks lots against their manifests
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    algorithm: ChecksumAlgorithm,
}

impl IntegrityVerifier {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Verify one manifest mapping against the staged fragments
    pub fn verify(
        &self,
        snapshot: &StagingSnapshot,
        mapping: &ManifestMapping,
    ) -> Result<VerificationResult, ValidationError> {
        let manifest = Manifest::from_file(&snapshot.path_of(&mapping.manifest))?;

        // a count mismatch fails regardless of checksums, so skip hashing
        if manifest.declared_count != mapping.covered.len() {
            return Err(ValidationError::CountMismatch {
                manifest: manifest.name,
                declared: manifest.declared_count,
                actual: mapping.covered.len(),
            });
        }

        let computed = mapping
            .covered
            .iter()
            .map(|fragment| {
                let path = snapshot.path_of(fragment);
                let checksum = compute_file_checksum(&path, self.algorithm)
                    .map_err(|source| ValidationError::MissingFile { path, source })?;
                debug!(%fragment, %checksum, "Computed fragment checksum");
                Ok(checksum)
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let result = build_result(&manifest, computed);
        let result = result.into_verdict()?;
        info!(
            manifest = %result.manifest,
            fragments = result.actual_count,
            "Manifest verified"
        );
        Ok(result)
    }
}

fn build_result(manifest: &Manifest, computed: Vec<String>) -> VerificationResult {
    let mut declared_checksums = manifest.checksums();
    declared_checksums.sort();

    let mut computed_checksums: Vec<String> =
        computed.into_iter().map(|c| c.to_lowercase()).collect();
    computed_checksums.sort();

    VerificationResult {
        manifest: manifest.name.clone(),
        declared_count: manifest.declared_count,
        actual_count: computed_checksums.len(),
        declared_checksums,
        computed_checksums,
    }
}

/// Elements of `declared` not matched in `computed`, and vice versa
fn multiset_difference(declared: &[String], computed: &[String]) -> (Vec<String>, Vec<String>) {
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for c in declared {
        *counts.entry(c.as_str()).or_default() += 1;
    }
    for c in computed {
        *counts.entry(c.as_str()).or_default() -= 1;
    }

    let mut missing = Vec::new();
    let mut unexpected = Vec::new();
    for (checksum, n) in counts {
        for _ in 0..n.unsigned_abs() {
            if n > 0 {
                missing.push(checksum.to_string());
            } else {
                unexpected.push(checksum.to_string());
            }
        }
    }
    missing.sort();
    unexpected.sort();
    (missing, unexpected)
}
