#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! SHA-256 payload verification for upd
//!
//! This crate provides the hash value type used for payload identity and
//! integrity checks, plus a streaming verifier whose internal state can be
//! snapshotted and restored so an interrupted download resumes verification
//! at the exact byte it left off - without re-reading verified bytes.

mod verifier;

pub use verifier::{HashState, Verifier};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use upd_errors::{Error, IntegrityError};

/// A SHA-256 hash value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash {
    bytes: [u8; 32],
}

impl Hash {
    /// Create a hash from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Convert to the base64 form used on the wire and in logs
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns an error if the input is not 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| Error::internal(format!("invalid hex: {e}")))?;
        Self::try_from_slice(&bytes)
    }

    /// Parse from the base64 form
    ///
    /// # Errors
    /// Returns an error if the input is not valid base64 for 32 bytes.
    pub fn from_base64(s: &str) -> Result<Self, Error> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| Error::internal(format!("invalid base64: {e}")))?;
        Self::try_from_slice(&bytes)
    }

    fn try_from_slice(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 {
            return Err(IntegrityError::DigestMismatch {
                expected: "32-byte digest".to_string(),
                actual: format!("{} bytes", bytes.len()),
            }
            .into());
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(bytes);
        Ok(Self::from_bytes(array))
    }

    /// Compute hash of a byte slice in one pass
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Verifier::digest_of(data)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hash = Hash::from_data(b"test");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn base64_round_trip() {
        let hash = Hash::from_data(b"test");
        let parsed = Hash::from_base64(&hash.to_base64()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_base64("aGk=").is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let hash = Hash::from_data(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }
}
