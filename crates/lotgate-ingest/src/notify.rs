//! Per-lot summary notifications
//!
//! Every lot that passed verification produces exactly one notification,
//! success or failure. The message is plain language; diagnostics stay in
//! the operational log.

use crate::config::NotificationConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// What happened to a verified lot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LotOutcome {
    Success { records: usize },
    Failure { reason: String },
}

impl LotOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LotOutcome::Success { .. })
    }
}

/// Rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn render(config: &NotificationConfig, lot_id: &str, outcome: &LotOutcome) -> Self {
        let body = match outcome {
            LotOutcome::Success { records } => format!(
                "Hello,\n\nlot {} was imported successfully. {} document(s) were delivered.\n",
                lot_id, records
            ),
            LotOutcome::Failure { .. } => format!(
                "Hello,\n\nlot {} could not be imported completely. \
                 The operations team has the details in the import log.\n",
                lot_id
            ),
        };

        Self {
            sender: config.sender.clone(),
            recipients: config.recipients.clone(),
            subject: config.subject_template.replace("{lot_id}", lot_id),
            body,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, lot_id: &str, outcome: &LotOutcome) -> Result<(), NotifyError>;
}

/// Writes notifications to the log; the mail relay picks them up from there
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    config: NotificationConfig,
}

impl LogNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, lot_id: &str, outcome: &LotOutcome) -> Result<(), NotifyError> {
        let message = Notification::render(&self.config, lot_id, outcome);
        info!(
            target: "lotgate::notification",
            %lot_id,
            success = outcome.is_success(),
            sender = %message.sender,
            recipients = %message.recipients.join(","),
            subject = %message.subject,
            body = %message.body,
            "Lot notification"
        );
        Ok(())
    }
}
