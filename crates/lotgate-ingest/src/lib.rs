//! Lotgate ingest pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Takes document lots that an upstream transfer channel split into byte-range
//! fragments, checks them against their checksum manifests, rebuilds and
//! extracts each lot archive, turns the bundled XML index into document
//! records and posts every record to the ingestion API.
//!
//! # Pipeline
//!
//! ```text
//! StagingSnapshot -> LotClassifier -> ManifestMatcher -> IntegrityVerifier
//!     -> ArchiveAssembler -> DocumentPublisher -> DocumentIndexExtractor
//!     -> DeliveryPipeline -> Notifier -> BackupSink
//! ```
//!
//! [`run::IngestRun`] drives one pass over the staging directory.
//!
//! # Example
//!
//! ```no_run
//! use lotgate_ingest::config::IngestConfig;
//! use lotgate_ingest::run::IngestRun;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IngestConfig::load(Some(std::path::Path::new("lotgate.yaml")))?;
//! config.validate_delivery()?;
//! let report = IngestRun::new(config)?.execute().await?;
//! println!("{} records delivered", report.delivered);
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod backup;
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod error;
pub mod index;
pub mod lot;
pub mod manifest;
pub mod notify;
pub mod run;
pub mod staging;
pub mod token;
pub mod verifier;

pub use config::IngestConfig;
pub use error::RunError;
pub use index::DocumentRecord;
pub use run::{IngestRun, RunReport};
