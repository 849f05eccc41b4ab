//! Run orchestration
//!
//! One run takes a snapshot of the staging directory and walks every lot
//! through verification, assembly, publication, extraction and delivery.
//! Failures stay with their lot; the only run-level failure is a non-empty
//! staging directory in which not a single lot verifies.

use crate::assembler::{ArchiveAssembler, DocumentPublisher};
use crate::backup::{BackupSink, DirectoryBackup};
use crate::classifier::{LotClassifier, LotFiles};
use crate::config::{IngestConfig, StagingConfig};
use crate::delivery::{BatchOutcome, DeliveryPipeline};
use crate::error::{RunError, ValidationError};
use crate::index::DocumentIndexExtractor;
use crate::lot::{batch_token, Lot, LotState, Stage};
use crate::manifest::{ManifestMapping, ManifestMatcher};
use crate::notify::{LogNotifier, LotOutcome, Notifier};
use crate::staging::StagingSnapshot;
use crate::verifier::IntegrityVerifier;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{error, info, info_span, warn, Instrument};

/// Lots of one staging snapshot after the verification gate
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifiedStaging {
    pub lots: Vec<Lot>,
    /// Files excluded because no lot id could be read from their name
    pub unclassified: Vec<String>,
}

impl VerifiedStaging {
    pub fn valid_count(&self) -> usize {
        self.lots.iter().filter(|l| l.state == LotState::Valid).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.lots.len() - self.valid_count()
    }
}

/// Classify, match manifests and verify every lot of `snapshot`
pub fn verify_staging(config: &StagingConfig, snapshot: &StagingSnapshot) -> VerifiedStaging {
    let classifier = LotClassifier::new(config);
    let classification = classifier.classify(snapshot.filenames());
    let matcher = ManifestMatcher::new(classifier);
    let verifier = IntegrityVerifier::new(config.checksum_algorithm);

    let mut by_lot: HashMap<String, ManifestMapping> = HashMap::new();
    let mut manifest_order: Vec<String> = Vec::new();
    for mapping in matcher.match_manifests(snapshot.filenames()) {
        let Some(lot_id) = matcher.lot_id_of(&mapping) else {
            warn!(manifest = %mapping.manifest, "Manifest name carries no lot id; ignoring it");
            continue;
        };
        if let Some(existing) = by_lot.get(&lot_id) {
            warn!(
                %lot_id,
                kept = %existing.manifest,
                ignored = %mapping.manifest,
                "Lot has more than one manifest"
            );
            continue;
        }
        manifest_order.push(lot_id.clone());
        by_lot.insert(lot_id, mapping);
    }

    let mut lots: Vec<Lot> = classification
        .lots
        .into_iter()
        .map(|files| {
            let manifest = by_lot.get(&files.lot_id).map(|m| m.manifest.clone());
            Lot::new(files, manifest)
        })
        .collect();

    // manifests whose fragments never arrived still get a verdict
    for lot_id in manifest_order {
        if lots.iter().all(|l| l.id != lot_id) {
            let manifest = by_lot.get(&lot_id).map(|m| m.manifest.clone());
            lots.push(Lot::new(
                LotFiles {
                    lot_id,
                    fragments: Vec::new(),
                },
                manifest,
            ));
        }
    }

    for lot in &mut lots {
        let verdict = match by_lot.get(&lot.id) {
            Some(mapping) => verifier
                .verify(snapshot, mapping)
                .and_then(|_| check_coverage(lot, mapping)),
            None => Err(ValidationError::MissingManifest {
                lot_id: lot.id.clone(),
            }),
        };
        match verdict {
            Ok(()) => {
                info!(lot_id = %lot.id, fragments = lot.fragments.len(), "Lot is valid");
                lot.transition(LotState::Valid);
            },
            Err(e) => {
                warn!(lot_id = %lot.id, error = %e, "Lot failed verification");
                lot.transition(LotState::Invalid {
                    reason: e.to_string(),
                });
            },
        }
    }

    VerifiedStaging {
        lots,
        unclassified: classification
            .rejected
            .into_iter()
            .map(|e| e.filename)
            .collect(),
    }
}

/// Only fragments the manifest vouches for may be assembled
fn check_coverage(lot: &Lot, mapping: &ManifestMapping) -> Result<(), ValidationError> {
    let covered: HashSet<&String> = mapping.covered.iter().collect();
    let fragments: HashSet<&String> = lot.fragments.iter().collect();
    if covered == fragments {
        return Ok(());
    }

    let mut uncovered: Vec<String> = fragments
        .symmetric_difference(&covered)
        .map(|f| (*f).clone())
        .collect();
    uncovered.sort();
    Err(ValidationError::UncoveredFragments {
        lot_id: lot.id.clone(),
        manifest: mapping.manifest.clone(),
        uncovered,
    })
}

/// Final account of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_date: NaiveDate,
    pub lots: Vec<Lot>,
    pub unclassified: Vec<String>,
    pub delivered: usize,
    pub rejected: usize,
    pub errored: usize,
    pub backup: Option<PathBuf>,
}

impl RunReport {
    fn empty(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            lots: Vec::new(),
            unclassified: Vec::new(),
            delivered: 0,
            rejected: 0,
            errored: 0,
            backup: None,
        }
    }

    pub fn lot(&self, lot_id: &str) -> Option<&Lot> {
        self.lots.iter().find(|l| l.id == lot_id)
    }

    /// True when every lot ended with all of its records delivered
    pub fn is_success(&self) -> bool {
        !self.lots.is_empty() && self.lots.iter().all(|l| l.state.is_success())
    }

    fn record(&mut self, batch: &BatchOutcome) {
        self.delivered += batch.delivered();
        self.rejected += batch.rejected();
        self.errored += batch.errored();
    }
}

/// The whole pipeline with its collaborators
pub struct IngestRun {
    config: IngestConfig,
    delivery: DeliveryPipeline,
    notifier: Box<dyn Notifier>,
    backup: Option<Box<dyn BackupSink>>,
    run_date: NaiveDate,
}

impl IngestRun {
    /// Build with the log notifier and, when enabled, directory backups
    pub fn new(config: IngestConfig) -> Result<Self, RunError> {
        let delivery = DeliveryPipeline::new(&config.delivery)?;
        let notifier = Box::new(LogNotifier::new(config.notification.clone()));
        let backup: Option<Box<dyn BackupSink>> = config
            .backup
            .enabled
            .then(|| Box::new(DirectoryBackup::new(&config.backup.backup_dir)) as Box<dyn BackupSink>);
        Ok(Self::with_components(config, delivery, notifier, backup))
    }

    pub fn with_components(
        config: IngestConfig,
        delivery: DeliveryPipeline,
        notifier: Box<dyn Notifier>,
        backup: Option<Box<dyn BackupSink>>,
    ) -> Self {
        Self {
            config,
            delivery,
            notifier,
            backup,
            run_date: Local::now().date_naive(),
        }
    }

    /// Date used in batch tokens; defaults to today
    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }

    pub async fn execute(&self) -> Result<RunReport, RunError> {
        let staging_dir = &self.config.staging.staging_dir;
        let snapshot = StagingSnapshot::read(staging_dir)?;
        let mut report = RunReport::empty(self.run_date);

        if snapshot.is_empty() {
            info!(dir = %staging_dir.display(), "No new data in staging directory");
            return Ok(report);
        }

        let verified = verify_staging(&self.config.staging, &snapshot);
        if verified.valid_count() == 0 {
            error!(
                lots = verified.lots.len(),
                unclassified = verified.unclassified.len(),
                "No valid lot in staging directory"
            );
            return Err(RunError::NoValidLots {
                invalid: verified.invalid_count(),
            });
        }
        report.unclassified = verified.unclassified.clone();
        info!(
            valid = verified.valid_count(),
            invalid = verified.invalid_count(),
            "Verification finished"
        );

        for mut lot in verified.lots {
            if lot.state == LotState::Valid {
                let span = info_span!("lot", lot_id = %lot.id);
                async {
                    let batch = self.process_lot(&snapshot, &mut lot).await;
                    if let Some(batch) = &batch {
                        report.record(batch);
                    }
                    let delivered = batch.as_ref().map_or(0, BatchOutcome::delivered);
                    self.send_notification(&lot, delivered).await;
                }
                .instrument(span)
                .await;
            }
            report.lots.push(lot);
        }

        if let Some(backup) = &self.backup {
            match backup.backup(staging_dir).await {
                Ok(path) => report.backup = Some(path),
                Err(e) => error!(error = %e, "Staging backup failed"),
            }
        }

        info!(
            lots = report.lots.len(),
            delivered = report.delivered,
            rejected = report.rejected,
            errored = report.errored,
            "Run finished"
        );
        Ok(report)
    }

    /// Assemble, publish, extract and deliver one valid lot
    async fn process_lot(&self, snapshot: &StagingSnapshot, lot: &mut Lot) -> Option<BatchOutcome> {
        let staging = &self.config.staging;
        let documents = &self.config.documents;
        let token = batch_token(self.run_date, &lot.id);

        let assembler = ArchiveAssembler::new(&staging.work_dir);
        let assembled = match assembler.assemble(snapshot, &lot.id, &lot.fragments) {
            Ok(assembled) => assembled,
            Err(e) => {
                error!(error = %e, "Lot assembly failed");
                lot.fail(Stage::Assembly, e);
                return None;
            },
        };
        lot.transition(LotState::Assembled);

        let publisher = DocumentPublisher::new(&documents.publish_dir, &staging.documents_subdir);
        if let Err(e) = publisher.publish(&assembled.extract_dir, &token) {
            error!(error = %e, "Document publication failed");
            lot.fail(Stage::Publication, e);
            return None;
        }

        let extractor = DocumentIndexExtractor::new(&documents.url_prefix);
        let index = assembled.extract_dir.join(&staging.index_file);
        let records = match extractor.extract_file(&index, &token) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Index extraction failed");
                lot.fail(Stage::Extraction, e);
                return None;
            },
        };
        lot.transition(LotState::Extracted {
            records: records.len(),
        });

        let batch = self.delivery.deliver(&records).await;
        lot.transition(LotState::Delivered {
            all_delivered: batch.all_delivered(),
        });
        Some(batch)
    }

    async fn send_notification(&self, lot: &Lot, delivered: usize) {
        let outcome = match &lot.state {
            state if state.is_success() => LotOutcome::Success { records: delivered },
            other => LotOutcome::Failure {
                reason: other.to_string(),
            },
        };
        if let Err(e) = self.notifier.notify(&lot.id, &outcome).await {
            warn!(error = %e, "Notification failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn md5_of(data: &[u8]) -> String {
        format!("{:x}", md5::compute(data))
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) {
        std::fs::write(dir.path().join(name), data).unwrap();
    }

    #[test]
    fn test_verify_staging_verdicts() {
        let dir = TempDir::new().unwrap();
        // lot 1: valid
        write(&dir, "Lotto_PwC_1.zip.001", b"one");
        write(
            &dir,
            "Lotto_PwC_1.zip.md5",
            format!("{} *Lotto_PwC_1.zip.001\n1\n", md5_of(b"one")).as_bytes(),
        );
        // lot 2: no manifest
        write(&dir, "Lotto_PwC_2.zip.001", b"two");
        // lot 3: manifest only
        write(&dir, "Lotto_PwC_3.zip.md5", b"abc *Lotto_PwC_3.zip.001\n1\n");
        write(&dir, "notes", b"?");

        let snapshot = StagingSnapshot::read(dir.path()).unwrap();
        let verified = verify_staging(&StagingConfig::default(), &snapshot);

        let states: Vec<(&str, bool)> = verified
            .lots
            .iter()
            .map(|l| (l.id.as_str(), l.state == LotState::Valid))
            .collect();
        assert_eq!(states, vec![("1", true), ("2", false), ("3", false)]);
        assert_eq!(verified.valid_count(), 1);
        assert_eq!(verified.invalid_count(), 2);
        assert_eq!(verified.unclassified, vec!["notes"]);

        match &verified.lots[1].state {
            LotState::Invalid { reason } => assert!(reason.contains("No manifest")),
            other => panic!("unexpected state {other}"),
        }
        match &verified.lots[2].state {
            LotState::Invalid { reason } => assert!(reason.contains("declares 1")),
            other => panic!("unexpected state {other}"),
        }
    }

    #[test]
    fn test_fragment_outside_manifest_invalidates_lot() {
        let dir = TempDir::new().unwrap();
        write(&dir, "Lotto_PwC_0042.zip.001", b"one");
        write(&dir, "Lotto_PwC_0042.bin", b"stray");
        write(
            &dir,
            "Lotto_PwC_0042.zip.md5",
            format!("{} *Lotto_PwC_0042.zip.001\n1\n", md5_of(b"one")).as_bytes(),
        );

        let snapshot = StagingSnapshot::read(dir.path()).unwrap();
        let verified = verify_staging(&StagingConfig::default(), &snapshot);

        assert_eq!(verified.lots.len(), 1);
        assert_eq!(verified.valid_count(), 0);
        match &verified.lots[0].state {
            LotState::Invalid { reason } => {
                assert!(reason.contains("Lotto_PwC_0042.bin"));
                assert!(!reason.contains("zip.001"));
            },
            other => panic!("unexpected state {other}"),
        }
    }

    #[test]
    fn test_report_success_requires_lots() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert!(!RunReport::empty(date).is_success());
    }
}
