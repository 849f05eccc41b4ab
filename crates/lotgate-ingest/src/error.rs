//! Error taxonomy for the ingest pipeline
//!
//! Every stage owns one error type. Per-file, per-lot and per-record errors
//! are logged and isolated by the run orchestrator; only [`RunError`] ever
//! stops a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// A staging filename that does not carry a lot identifier
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot classify '{filename}': expected at least {expected} '{delimiter}'-separated tokens, found {found}")]
pub struct ClassificationError {
    pub filename: String,
    pub delimiter: char,
    pub expected: usize,
    pub found: usize,
}

/// Why a lot failed manifest verification
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No manifest found for lot {lot_id}")]
    MissingManifest { lot_id: String },

    #[error("Malformed manifest {manifest}: {message}")]
    ManifestFormat { manifest: String, message: String },

    #[error("Manifest {manifest} declares {declared} fragments but {actual} are present")]
    CountMismatch {
        manifest: String,
        declared: usize,
        actual: usize,
    },

    #[error("Checksums of {manifest} do not match: missing from fragments {missing:?}, unexpected {unexpected:?}")]
    ChecksumMismatch {
        manifest: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Lot {lot_id} has fragments outside {manifest}: {uncovered:?}")]
    UncoveredFragments {
        lot_id: String,
        manifest: String,
        uncovered: Vec<String>,
    },

    #[error("Fragment {path} could not be read: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: lotgate_common::LotgateError,
    },
}

/// Archive reconstruction failure for a single lot
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("IO error while assembling {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lot {lot_id} has no fragments to assemble")]
    NoFragments { lot_id: String },

    #[error("Archive {path} is corrupt or incomplete: {source}")]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to publish documents from {from} to {to}: {message}")]
    Publish {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
}

/// XML index could not be turned into document records
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to read index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed XML index: {0}")]
    Xml(String),

    #[error("Index has no <{tag}> element with an id attribute")]
    MissingLotJob { tag: &'static str },

    #[error("<{element}> is missing its {attribute} attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("Document {document_id:?} in folder {label} has unusable path '{path}'")]
    MalformedPath {
        label: String,
        document_id: Option<String>,
        path: String,
    },
}

impl From<quick_xml::Error> for ExtractionError {
    fn from(err: quick_xml::Error) -> Self {
        ExtractionError::Xml(err.to_string())
    }
}

/// Authentication token could not be minted or opened
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token authentication failed")]
    Decrypt,
}

/// Per-record delivery failure
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Ingestion API rejected record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Errored(#[from] reqwest::Error),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A lot summary could not be handed to the notification channel
#[derive(Debug, Error)]
#[error("Failed to notify about lot {lot_id}: {message}")]
pub struct NotifyError {
    pub lot_id: String,
    pub message: String,
}

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    Env { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures that abort an entire run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No lot passed manifest verification ({invalid} invalid); aborting run")]
    NoValidLots { invalid: usize },

    #[error("Failed to read staging directory {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}
