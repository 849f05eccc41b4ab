//! Record delivery to the ingestion API
//!
//! Records are posted one at a time with a fixed pause between submissions.
//! Every failure stays with its record: a rejected or errored submission is
//! logged and the pipeline moves on to the next one. Nothing is retried.

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::index::DocumentRecord;
use crate::token::TokenMinter;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scheme word in the `Authorization` header
pub const AUTH_SCHEME: &str = "PWC";

/// Result of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Rejected { status: u16, body: String },
    Errored { message: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

impl From<Result<(), DeliveryError>> for DeliveryOutcome {
    fn from(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(DeliveryError::Rejected { status, body }) => {
                DeliveryOutcome::Rejected { status, body }
            },
            Err(other) => DeliveryOutcome::Errored {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub document_id: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Outcomes of one lot's records, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub records: Vec<RecordOutcome>,
}

impl BatchOutcome {
    /// True when every record was delivered, including the empty batch
    pub fn all_delivered(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_delivered())
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Rejected { .. }))
    }

    pub fn errored(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Errored { .. }))
    }

    fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Sequential, throttled submitter
#[derive(Debug, Clone)]
pub struct DeliveryPipeline {
    client: Client,
    endpoint_url: String,
    minter: TokenMinter,
    delay: Duration,
}

impl DeliveryPipeline {
    pub fn new(config: &DeliveryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self::with_client(
            client,
            config.endpoint_url.clone(),
            TokenMinter::new(&config.shared_secret, &config.token_fixed_part),
            config.delay(),
        ))
    }

    pub fn with_client(
        client: Client,
        endpoint_url: impl Into<String>,
        minter: TokenMinter,
        delay: Duration,
    ) -> Self {
        Self {
            client,
            endpoint_url: endpoint_url.into(),
            minter,
            delay,
        }
    }

    /// Post a single record with a freshly minted token
    pub async fn submit(&self, record: &DocumentRecord) -> Result<(), DeliveryError> {
        let token = self.minter.mint()?;
        let body = serde_json::to_vec_pretty(record)?;

        let response = self
            .client
            .post(&self.endpoint_url)
            .header(AUTHORIZATION, format!("{} {}", AUTH_SCHEME, token))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), response = %text, "Ingestion API accepted record");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Submit every record in order, pausing between submissions
    pub async fn deliver(&self, records: &[DocumentRecord]) -> BatchOutcome {
        let mut batch = BatchOutcome::default();

        for (i, record) in records.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = DeliveryOutcome::from(self.submit(record).await);
            match &outcome {
                DeliveryOutcome::Delivered => {
                    info!(document_id = %record.document_id, label = %record.label, "Record delivered");
                },
                DeliveryOutcome::Rejected { status, body } => {
                    warn!(
                        document_id = %record.document_id,
                        status,
                        body = %body,
                        "Record rejected by ingestion API"
                    );
                },
                DeliveryOutcome::Errored { message } => {
                    error!(document_id = %record.document_id, error = %message, "Record delivery failed");
                },
            }

            batch.records.push(RecordOutcome {
                document_id: record.document_id.clone(),
                outcome,
            });
        }

        info!(
            delivered = batch.delivered(),
            rejected = batch.rejected(),
            errored = batch.errored(),
            "Delivery finished"
        );
        batch
    }
}
