//! Lotgate Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the lotgate workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`LotgateError`] and the [`Result`] alias
//! - **Checksums**: streaming file digests used to verify fragment manifests
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use lotgate_common::checksum::{compute_file_checksum, ChecksumAlgorithm};
//!
//! fn digest(path: &str) -> lotgate_common::Result<()> {
//!     let md5 = compute_file_checksum(path, ChecksumAlgorithm::Md5)?;
//!     tracing::info!(%md5, "fragment digest");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{LotgateError, Result};
