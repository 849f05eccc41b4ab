//! Ingest configuration
//!
//! One [`IngestConfig`] value is loaded at startup (YAML file, then
//! `LOTGATE_*` environment overrides) and handed to each pipeline component.
//! Nothing in the pipeline reads the environment on its own.

use crate::error::ConfigError;
use lotgate_common::checksum::ChecksumAlgorithm;
use lotgate_common::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Suffix identifying manifest files in the staging directory.
pub const DEFAULT_MANIFEST_SUFFIX: &str = ".md5";

/// Suffix of transfer-channel control files, never part of a lot.
pub const DEFAULT_CONTROL_SUFFIX: &str = ".t";

/// Delimiter between tokens of a fragment filename.
pub const DEFAULT_DELIMITER: char = '_';

/// Position of the lot identifier among the delimiter-separated tokens.
pub const DEFAULT_LOT_TOKEN_INDEX: usize = 2;

/// Name of the XML index inside each lot archive.
pub const DEFAULT_INDEX_FILE: &str = "indice.xml";

/// Directory inside each lot archive that holds the referenced documents.
pub const DEFAULT_DOCUMENTS_SUBDIR: &str = "PDF";

/// Pause between two submissions to the ingestion API.
pub const DEFAULT_DELIVERY_DELAY_SECS: u64 = 30;

/// Timeout for a single ingestion API call.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Subject of the per-lot notification.
pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Import of lot {lot_id}";

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub staging: StagingConfig,
    pub documents: DocumentsConfig,
    pub delivery: DeliveryConfig,
    pub notification: NotificationConfig,
    pub backup: BackupConfig,
    pub logging: LogConfig,
}

/// Where fragments are found and how their names are read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory the transfer channel deposits fragments into
    pub staging_dir: PathBuf,
    /// Scratch directory for per-lot archives and extracted content
    pub work_dir: PathBuf,
    pub manifest_suffix: String,
    pub control_suffix: String,
    pub delimiter: char,
    pub lot_token_index: usize,
    pub index_file: String,
    pub documents_subdir: String,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./staging"),
            work_dir: PathBuf::from("./work"),
            manifest_suffix: DEFAULT_MANIFEST_SUFFIX.to_string(),
            control_suffix: DEFAULT_CONTROL_SUFFIX.to_string(),
            delimiter: DEFAULT_DELIMITER,
            lot_token_index: DEFAULT_LOT_TOKEN_INDEX,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            documents_subdir: DEFAULT_DOCUMENTS_SUBDIR.to_string(),
            checksum_algorithm: ChecksumAlgorithm::Md5,
        }
    }
}

/// Where extracted documents are published and how records point at them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Root the documents sub-directory of each lot is copied under
    pub publish_dir: PathBuf,
    /// Prefix of every `file_relative_url`
    pub url_prefix: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            publish_dir: PathBuf::from("./documents"),
            url_prefix: "documents".to_string(),
        }
    }
}

/// Ingestion API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub endpoint_url: String,
    /// Shared secret the token is encrypted under
    pub shared_secret: String,
    /// Constant prefix of the token plaintext
    pub token_fixed_part: String,
    pub delay_secs: u64,
    pub timeout_secs: u64,
    /// The ingestion API is commonly served with an internal certificate
    pub accept_invalid_certs: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            shared_secret: String::new(),
            token_fixed_part: String::new(),
            delay_secs: DEFAULT_DELIVERY_DELAY_SECS,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            accept_invalid_certs: false,
        }
    }
}

impl DeliveryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-lot summary recipients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    /// Subject line; `{lot_id}` is replaced with the lot identifier
    pub subject_template: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            sender: String::new(),
            recipients: Vec::new(),
            subject_template: DEFAULT_SUBJECT_TEMPLATE.to_string(),
        }
    }
}

/// Copy of the staging directory kept after every run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub backup_dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backup_dir: PathBuf::from("./backup"),
        }
    }
}

impl IngestConfig {
    /// Load from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };

        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `LOTGATE_*` environment variables
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(dir) = env_var("LOTGATE_STAGING_DIR") {
            self.staging.staging_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("LOTGATE_WORK_DIR") {
            self.staging.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("LOTGATE_PUBLISH_DIR") {
            self.documents.publish_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_var("LOTGATE_URL_PREFIX") {
            self.documents.url_prefix = prefix;
        }
        if let Some(url) = env_var("LOTGATE_ENDPOINT_URL") {
            self.delivery.endpoint_url = url;
        }
        if let Some(secret) = env_var("LOTGATE_SHARED_SECRET") {
            self.delivery.shared_secret = secret;
        }
        if let Some(part) = env_var("LOTGATE_TOKEN_FIXED_PART") {
            self.delivery.token_fixed_part = part;
        }
        if let Some(delay) = env_var("LOTGATE_DELIVERY_DELAY_SECS") {
            self.delivery.delay_secs = parse_env("LOTGATE_DELIVERY_DELAY_SECS", &delay)?;
        }
        if let Some(timeout) = env_var("LOTGATE_HTTP_TIMEOUT_SECS") {
            self.delivery.timeout_secs = parse_env("LOTGATE_HTTP_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(dir) = env_var("LOTGATE_BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(dir);
        }
        if let Some(subject) = env_var("LOTGATE_NOTIFY_SUBJECT") {
            self.notification.subject_template = subject;
        }
        if let Some(recipients) = env_var("LOTGATE_NOTIFY_RECIPIENTS") {
            self.notification.recipients = recipients
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.logging = self
            .logging
            .with_env_overrides()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(self)
    }

    /// Validate the staging settings every command depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staging.manifest_suffix.is_empty() {
            return Err(ConfigError::Invalid("manifest_suffix cannot be empty".to_string()));
        }
        if self.staging.control_suffix.is_empty() {
            return Err(ConfigError::Invalid("control_suffix cannot be empty".to_string()));
        }
        if self.staging.index_file.is_empty() {
            return Err(ConfigError::Invalid("index_file cannot be empty".to_string()));
        }
        // lot ids are read from the part of the name before the first '.'
        if self.staging.delimiter == '.' && self.staging.lot_token_index > 0 {
            return Err(ConfigError::Invalid(format!(
                "lot_token_index {} can never be reached with '.' as delimiter",
                self.staging.lot_token_index
            )));
        }
        if self.staging.delimiter.is_whitespace() {
            return Err(ConfigError::Invalid("delimiter cannot be whitespace".to_string()));
        }
        if !self.notification.subject_template.contains("{lot_id}") {
            return Err(ConfigError::Invalid(
                "notification.subject_template must contain {lot_id}".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks only needed when records are actually sent
    pub fn validate_delivery(&self) -> Result<(), ConfigError> {
        if self.delivery.endpoint_url.is_empty() {
            return Err(ConfigError::Invalid("delivery.endpoint_url cannot be empty".to_string()));
        }
        if self.delivery.shared_secret.is_empty() {
            return Err(ConfigError::Invalid("delivery.shared_secret cannot be empty".to_string()));
        }
        if self.delivery.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "delivery.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.notification.recipients.is_empty() {
            tracing::warn!("No notification recipients configured");
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn deliverable() -> IngestConfig {
        let mut config = IngestConfig::default();
        config.delivery.endpoint_url = "https://ingest.example.com/api/documents".to_string();
        config.delivery.shared_secret = "s3cret".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.staging.manifest_suffix, ".md5");
        assert_eq!(config.staging.control_suffix, ".t");
        assert_eq!(config.staging.delimiter, '_');
        assert_eq!(config.staging.lot_token_index, 2);
        assert_eq!(config.staging.index_file, "indice.xml");
        assert_eq!(config.delivery.delay(), Duration::from_secs(30));
        assert!(config.backup.enabled);
    }

    #[test]
    fn test_validate_delivery_requires_endpoint_and_secret() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_delivery().is_err());

        let config = deliverable();
        assert!(config.validate_delivery().is_ok());

        let mut config = deliverable();
        config.delivery.shared_secret.clear();
        assert!(config.validate_delivery().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_suffix() {
        let mut config = deliverable();
        config.staging.manifest_suffix.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unreachable_lot_token() {
        let mut config = deliverable();
        config.staging.delimiter = '.';
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lot_token_index 2"));

        config.staging.lot_token_index = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_lot_id_in_subject() {
        let mut config = deliverable();
        config.notification.subject_template = "Lot imported".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
staging:
  staging_dir: /srv/incoming
delivery:
  endpoint_url: https://ingest.example.com/api/documents
  shared_secret: s3cret
  token_fixed_part: LOT
  delay_secs: 2
notification:
  recipients: [ops@example.com]
"#
        )
        .unwrap();

        let config = IngestConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.staging.staging_dir, PathBuf::from("/srv/incoming"));
        assert_eq!(config.staging.manifest_suffix, ".md5");
        assert_eq!(config.delivery.token_fixed_part, "LOT");
        assert_eq!(config.delivery.delay_secs, 2);
        assert_eq!(config.delivery.timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(config.notification.recipients, vec!["ops@example.com"]);
        assert_eq!(config.notification.subject_template, DEFAULT_SUBJECT_TEMPLATE);
        assert!(config.validate_delivery().is_ok());
    }

    #[test]
    fn test_malformed_yaml_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "staging: [not, a, map").unwrap();
        assert!(matches!(
            IngestConfig::from_yaml_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_env_reports_variable() {
        let err = parse_env::<u64>("LOTGATE_DELIVERY_DELAY_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("LOTGATE_DELIVERY_DELAY_SECS"));
    }
}
