//! Lots and their lifecycle

use crate::classifier::LotFiles;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Date-scoped lot token, `<YYYY_MM_DD>_<lot_id>`
///
/// Names the published documents directory and appears in every
/// `file_relative_url` of the lot.
pub fn batch_token(date: NaiveDate, lot_id: &str) -> String {
    format!("{}_{}", date.format("%Y_%m_%d"), lot_id)
}

/// Pipeline stage a lot failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Assembly,
    Publication,
    Extraction,
    Delivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Assembly => "assembly",
            Stage::Publication => "publication",
            Stage::Extraction => "extraction",
            Stage::Delivery => "delivery",
        };
        f.write_str(name)
    }
}

/// Where a lot currently stands
///
/// `Pending -> Valid | Invalid`, then for valid lots
/// `Assembled -> Extracted -> Delivered`, or `Failed` at any of those steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LotState {
    Pending,
    Valid,
    Invalid { reason: String },
    Assembled,
    Extracted { records: usize },
    Delivered { all_delivered: bool },
    Failed { stage: Stage, reason: String },
}

impl LotState {
    /// No further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LotState::Invalid { .. } | LotState::Delivered { .. } | LotState::Failed { .. }
        )
    }

    /// True only for a lot whose every record was delivered
    pub fn is_success(&self) -> bool {
        matches!(self, LotState::Delivered { all_delivered: true })
    }
}

impl fmt::Display for LotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotState::Pending => write!(f, "pending"),
            LotState::Valid => write!(f, "valid"),
            LotState::Invalid { reason } => write!(f, "invalid: {}", reason),
            LotState::Assembled => write!(f, "assembled"),
            LotState::Extracted { records } => write!(f, "extracted ({} records)", records),
            LotState::Delivered { all_delivered: true } => write!(f, "delivered"),
            LotState::Delivered { all_delivered: false } => write!(f, "partially delivered"),
            LotState::Failed { stage, reason } => write!(f, "failed during {}: {}", stage, reason),
        }
    }
}

/// Unit of processing: one lot id, its ordered fragments and its manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lot {
    pub id: String,
    pub fragments: Vec<String>,
    pub manifest: Option<String>,
    pub state: LotState,
}

impl Lot {
    pub fn new(files: LotFiles, manifest: Option<String>) -> Self {
        Self {
            id: files.lot_id,
            fragments: files.fragments,
            manifest,
            state: LotState::Pending,
        }
    }

    pub fn transition(&mut self, next: LotState) {
        tracing::debug!(lot_id = %self.id, from = %self.state, to = %next, "Lot state change");
        self.state = next;
    }

    pub fn fail(&mut self, stage: Stage, reason: impl ToString) {
        self.transition(LotState::Failed {
            stage,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lot() -> Lot {
        Lot::new(
            LotFiles {
                lot_id: "0042".to_string(),
                fragments: vec!["Lotto_PwC_0042.zip.001".to_string()],
            },
            Some("Lotto_PwC_0042.zip.md5".to_string()),
        )
    }

    #[test]
    fn test_lifecycle() {
        let mut lot = lot();
        assert_eq!(lot.state, LotState::Pending);
        assert!(!lot.state.is_terminal());

        lot.transition(LotState::Valid);
        lot.transition(LotState::Assembled);
        lot.transition(LotState::Extracted { records: 2 });
        lot.transition(LotState::Delivered { all_delivered: false });

        assert!(lot.state.is_terminal());
        assert!(!lot.state.is_success());
        assert_eq!(lot.state.to_string(), "partially delivered");
    }

    #[test]
    fn test_fail_records_stage() {
        let mut lot = lot();
        lot.fail(Stage::Extraction, "no lot job");
        assert_eq!(lot.state.to_string(), "failed during extraction: no lot job");
        assert!(lot.state.is_terminal());
    }

    #[test]
    fn test_batch_token() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(batch_token(date, "0042"), "2024_03_07_0042");
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_value(LotState::Delivered { all_delivered: true }).unwrap();
        assert_eq!(json["state"], "delivered");
        assert_eq!(json["all_delivered"], true);
    }
}
