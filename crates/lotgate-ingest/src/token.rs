//! Per-request authentication tokens
//!
//! A token is the shared secret's encryption of `<fixed part><unix time>`:
//!
//! ```text
//! b64(ciphertext) * b64(salt) * b64(nonce) * b64(tag)
//! ```
//!
//! The key is scrypt(secret, salt) with N = 2^14, r = 8, p = 1 and a 32 byte
//! output; the cipher is AES-256-GCM with a 16 byte nonce. The ingestion API
//! decrypts the token and checks the timestamp, so a token is minted fresh for
//! every submission.

use crate::error::TokenError;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::fmt;

type TokenCipher = AesGcm<Aes256, U16>;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SEPARATOR: &str = "*";

/// Mints and opens tokens under one shared secret
#[derive(Clone)]
pub struct TokenMinter {
    secret: String,
    fixed_part: String,
}

impl fmt::Debug for TokenMinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMinter")
            .field("secret", &"<redacted>")
            .field("fixed_part", &self.fixed_part)
            .finish()
    }
}

impl TokenMinter {
    pub fn new(secret: impl Into<String>, fixed_part: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            fixed_part: fixed_part.into(),
        }
    }

    /// Token for the current instant
    pub fn mint(&self) -> Result<String, TokenError> {
        self.mint_at(Utc::now())
    }

    pub fn mint_at(&self, at: DateTime<Utc>) -> Result<String, TokenError> {
        let plaintext = format!("{}{}", self.fixed_part, unix_timestamp(at));

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = self.cipher(&salt)?;
        let sealed = cipher
            .encrypt(GenericArray::from_slice(&nonce[..]), plaintext.as_bytes())
            .map_err(|_| TokenError::Encrypt)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok([ciphertext, &salt[..], &nonce[..], tag]
            .iter()
            .map(|part| STANDARD.encode(part))
            .collect::<Vec<_>>()
            .join(SEPARATOR))
    }

    /// Decrypt a token minted under the same secret, returning its plaintext
    pub fn open(&self, token: &str) -> Result<String, TokenError> {
        let parts: Vec<&str> = token.split(SEPARATOR).collect();
        let [ciphertext, salt, nonce, tag] = parts.as_slice() else {
            return Err(TokenError::Malformed(format!(
                "expected 4 '{}'-separated parts, found {}",
                SEPARATOR,
                parts.len()
            )));
        };

        let decode = |part: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| TokenError::Malformed(e.to_string()))
        };
        let mut sealed = decode(*ciphertext)?;
        let salt = decode(*salt)?;
        let nonce = decode(*nonce)?;
        let tag = decode(*tag)?;

        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(TokenError::Malformed("bad nonce or tag length".to_string()));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher(&salt)?
            .decrypt(GenericArray::from_slice(nonce.as_slice()), sealed.as_slice())
            .map_err(|_| TokenError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|e| TokenError::Malformed(e.to_string()))
    }

    /// Fixed part prefix of an opened token
    pub fn fixed_part(&self) -> &str {
        &self.fixed_part
    }

    fn cipher(&self, salt: &[u8]) -> Result<TokenCipher, TokenError> {
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(self.secret.as_bytes(), salt, &params, &mut key)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
        TokenCipher::new_from_slice(&key).map_err(|e| TokenError::KeyDerivation(e.to_string()))
    }
}

/// Seconds since the epoch as the shortest float that round-trips,
/// e.g. `1709812345.0` or `1709812345.123456`
///
/// Whole seconds keep a single `.0`; trailing zeros are dropped.
pub fn unix_timestamp(at: DateTime<Utc>) -> String {
    // exact below 2^53 microseconds, so the division rounds once
    let seconds = at.timestamp_micros() as f64 / 1_000_000.0;
    format!("{:?}", seconds)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minter() -> TokenMinter {
        TokenMinter::new("s3cret", "LOTGATE")
    }

    #[test]
    fn test_mint_then_open() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 10, 30, 0).unwrap();
        let token = minter().mint_at(at).unwrap();

        assert_eq!(token.split('*').count(), 4);
        assert_eq!(minter().open(&token).unwrap(), "LOTGATE1709807400.0");
    }

    #[test]
    fn test_tokens_are_single_use() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 10, 30, 0).unwrap();
        let a = minter().mint_at(at).unwrap();
        let b = minter().mint_at(at).unwrap();
        // fresh salt and nonce every time
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = minter().mint().unwrap();
        let other = TokenMinter::new("other", "LOTGATE");
        assert!(matches!(other.open(&token), Err(TokenError::Decrypt)));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(minter().open("abc"), Err(TokenError::Malformed(_))));
        assert!(matches!(
            minter().open("!!*!!*!!*!!"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", minter());
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_unix_timestamp_float_rendering() {
        let whole = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(unix_timestamp(whole), "1700000000.0");

        let quarter = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(unix_timestamp(quarter), "1700000000.25");

        let micros = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(unix_timestamp(micros), "1700000000.123456");
    }
}
