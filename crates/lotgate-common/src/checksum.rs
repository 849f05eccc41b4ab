//! Checksum utilities for fragment verification
//!
//! Digests are computed over a chunked read so that multi-gigabyte fragments
//! never have to be held in memory. Results are lower-case hex strings.

use crate::error::{LotgateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Read buffer size for streaming digests
const CHUNK_SIZE: usize = 8192;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5, as written by `md5sum`-style manifests
    #[default]
    Md5,
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = LotgateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(LotgateError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|source| LotgateError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Md5 => {
            let mut context = md5::Context::new();
            drain(reader, |chunk| context.consume(chunk))?;
            Ok(format!("{:x}", context.compute()))
        },
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            drain(reader, |chunk| hasher.update(chunk))?;
            Ok(hex::encode(hasher.finalize()))
        },
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            drain(reader, |chunk| hasher.update(chunk))?;
            Ok(hex::encode(hasher.finalize()))
        },
    }
}

fn drain<R: Read>(reader: &mut R, mut update: impl FnMut(&[u8])) -> Result<()> {
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        update(&buffer[..bytes_read]);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_compute_checksum_md5() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(checksum, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_compute_checksum_md5_empty() {
        let mut cursor = Cursor::new(b"");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(checksum, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_compute_checksum_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(checksum, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn test_chunked_read_matches_single_pass() {
        // larger than one chunk so the loop runs several times
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let streamed = compute_checksum(&mut Cursor::new(&data), ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(streamed, format!("{:x}", md5::compute(&data)));
    }

    #[test]
    fn test_compute_file_checksum() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test").unwrap();
        let checksum = compute_file_checksum(file.path(), ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(checksum, "098f6bcd4621d373cade4e832627b4f6");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = compute_file_checksum("/nonexistent/fragment.001", ChecksumAlgorithm::Md5)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fragment.001"));
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("MD5".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Md5);
        assert_eq!("sha512".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha512);
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }
}
