//! Lot classification
//!
//! Fragment filenames carry their lot number as a delimiter-separated token,
//! e.g. `Lotto_PwC_0042.zip.003` belongs to lot `0042`. Manifests and
//! transfer control files are never part of a lot.

use crate::config::StagingConfig;
use crate::error::ClassificationError;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Rules for reading lot identifiers out of filenames
#[derive(Debug, Clone)]
pub struct LotClassifier {
    manifest_suffix: String,
    control_suffix: String,
    delimiter: char,
    token_index: usize,
}

/// Fragments grouped under one lot identifier, in listing order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotFiles {
    pub lot_id: String,
    pub fragments: Vec<String>,
}

/// Output of one classification pass
#[derive(Debug, Default)]
pub struct Classification {
    /// Lots in order of first appearance
    pub lots: Vec<LotFiles>,
    /// Files that could not be attributed to any lot
    pub rejected: Vec<ClassificationError>,
}

impl Classification {
    pub fn lot(&self, lot_id: &str) -> Option<&LotFiles> {
        self.lots.iter().find(|lot| lot.lot_id == lot_id)
    }
}

impl LotClassifier {
    pub fn new(config: &StagingConfig) -> Self {
        Self {
            manifest_suffix: config.manifest_suffix.clone(),
            control_suffix: config.control_suffix.clone(),
            delimiter: config.delimiter,
            token_index: config.lot_token_index,
        }
    }

    pub fn is_manifest(&self, filename: &str) -> bool {
        filename.ends_with(&self.manifest_suffix)
    }

    pub fn is_control(&self, filename: &str) -> bool {
        filename.ends_with(&self.control_suffix)
    }

    /// True for names that can belong to a lot
    pub fn is_fragment(&self, filename: &str) -> bool {
        !self.is_manifest(filename) && !self.is_control(filename)
    }

    pub fn manifest_suffix(&self) -> &str {
        &self.manifest_suffix
    }

    /// Lot identifier embedded in `filename`
    ///
    /// Everything from the first `.` on is ignored, the stem is split on the
    /// delimiter and the configured token is taken. An empty token counts as
    /// missing.
    pub fn lot_id_of(&self, filename: &str) -> Result<String, ClassificationError> {
        let stem = filename.split('.').next().unwrap_or(filename);
        let tokens: Vec<&str> = stem.split(self.delimiter).collect();

        match tokens.get(self.token_index) {
            Some(token) if !token.is_empty() => Ok((*token).to_string()),
            _ => Err(ClassificationError {
                filename: filename.to_string(),
                delimiter: self.delimiter,
                expected: self.token_index + 1,
                found: tokens.iter().filter(|t| !t.is_empty()).count(),
            }),
        }
    }

    /// Group fragment filenames by lot, preserving listing order
    pub fn classify(&self, filenames: &[String]) -> Classification {
        let mut classification = Classification::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for filename in filenames.iter().filter(|f| self.is_fragment(f)) {
            let lot_id = match self.lot_id_of(filename) {
                Ok(lot_id) => lot_id,
                Err(e) => {
                    warn!(error = %e, "Excluding unclassifiable file");
                    classification.rejected.push(e);
                    continue;
                },
            };

            let index = *positions.entry(lot_id.clone()).or_insert_with(|| {
                classification.lots.push(LotFiles {
                    lot_id: lot_id.clone(),
                    fragments: Vec::new(),
                });
                classification.lots.len() - 1
            });
            classification.lots[index].fragments.push(filename.clone());
        }

        debug!(
            lots = classification.lots.len(),
            rejected = classification.rejected.len(),
            "Classified staging files"
        );
        classification
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn classifier() -> LotClassifier {
        LotClassifier::new(&StagingConfig::default())
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lot_id_of() {
        let c = classifier();
        assert_eq!(c.lot_id_of("Lotto_PwC_0042.zip.001").unwrap(), "0042");
        assert_eq!(c.lot_id_of("Lotto_PwC_0042_extra.zip.001").unwrap(), "0042");

        let err = c.lot_id_of("Lotto_0042.zip.001").unwrap_err();
        assert_eq!(err.expected, 3);
        assert_eq!(err.found, 2);
        assert!(c.lot_id_of("Lotto_PwC_.zip.001").is_err());
    }

    #[test]
    fn test_classify_groups_by_lot_in_listing_order() {
        let input = names(&[
            "Lotto_PwC_0042.zip.001",
            "Lotto_PwC_0043.zip.001",
            "Lotto_PwC_0042.zip.002",
            "Lotto_PwC_0042.zip.md5",
            "Lotto_PwC_0043.zip.md5",
            "transfer_done.t",
        ]);

        let result = classifier().classify(&input);

        assert!(result.rejected.is_empty());
        assert_eq!(
            result.lots,
            vec![
                LotFiles {
                    lot_id: "0042".to_string(),
                    fragments: names(&["Lotto_PwC_0042.zip.001", "Lotto_PwC_0042.zip.002"]),
                },
                LotFiles {
                    lot_id: "0043".to_string(),
                    fragments: names(&["Lotto_PwC_0043.zip.001"]),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_name_is_rejected_without_affecting_others() {
        let input = names(&["README", "Lotto_PwC_0042.zip.001"]);
        let result = classifier().classify(&input);

        assert_eq!(result.lots.len(), 1);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].filename, "README");
    }

    #[test]
    fn test_custom_delimiter_and_index() {
        let config = StagingConfig {
            delimiter: '-',
            lot_token_index: 1,
            ..StagingConfig::default()
        };
        let c = LotClassifier::new(&config);
        assert_eq!(c.lot_id_of("batch-77-part.bin").unwrap(), "77");
    }

    proptest! {
        #[test]
        fn prop_grouped_union_equals_admissible_input(
            stems in prop::collection::vec("[A-Za-z]{1,4}(_[A-Za-z0-9]{0,3}){0,3}", 0..24),
            suffixes in prop::collection::vec(prop::sample::select(vec![".zip.001", ".zip.002", ".md5", ".t", ""]), 24),
        ) {
            let input: Vec<String> = stems
                .iter()
                .zip(suffixes.iter())
                .map(|(stem, suffix)| format!("{}{}", stem, suffix))
                .collect();
            let c = classifier();
            let result = c.classify(&input);

            let grouped: Vec<&String> = result.lots.iter().flat_map(|l| l.fragments.iter()).collect();
            let expected: Vec<&String> = input
                .iter()
                .filter(|f| c.is_fragment(f) && c.lot_id_of(f).is_ok())
                .collect();
            let rejected: HashSet<&str> = result.rejected.iter().map(|e| e.filename.as_str()).collect();

            prop_assert_eq!(grouped.len(), expected.len());
            let grouped_set: HashSet<&String> = grouped.into_iter().collect();
            let expected_set: HashSet<&String> = expected.into_iter().collect();
            prop_assert_eq!(grouped_set, expected_set);
            for lot in &result.lots {
                for fragment in &lot.fragments {
                    prop_assert_eq!(c.lot_id_of(fragment).unwrap(), lot.lot_id.clone());
                    prop_assert!(!rejected.contains(fragment.as_str()));
                }
            }
        }
    }
}
