//! Blake3 content fingerprints.
//!
//! A fingerprint is the deduplication key of the vault: identical bytes
//! always produce the same fingerprint, whoever uploads them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LokrError, LokrResult};

/// A Blake3 content hash used as the deduplication key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint {
    /// The raw hash bytes (32 bytes for Blake3)
    bytes: [u8; 32],
}

impl Fingerprint {
    /// Create a new Fingerprint from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Create a Fingerprint from a byte slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> LokrResult<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            LokrError::validation("fingerprint", format!("expected 32 bytes, got {} bytes", bytes.len()))
        })?;
        Ok(Self { bytes: array })
    }

    /// Convert fingerprint to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Create Fingerprint from hexadecimal string
    pub fn from_hex(hex_str: &str) -> LokrResult<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| LokrError::validation("fingerprint", format!("invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Sharded blob key: `ab/cd/abcd...`.
    ///
    /// The first four hex characters become two directory levels so no
    /// single directory holds more than 256 entries per level.
    pub fn storage_key(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}/{}", &hex[0..2], &hex[2..4], hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = LokrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = LokrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

/// Compute the Blake3 fingerprint of content
pub fn fingerprint(content: &[u8]) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content);
    Fingerprint::new(*hasher.finalize().as_bytes())
}

/// Verify data integrity against an expected fingerprint
pub fn verify_integrity(data: &[u8], expected: &Fingerprint) -> LokrResult<()> {
    let actual = fingerprint(data);
    if &actual == expected {
        Ok(())
    } else {
        Err(LokrError::ConsistencyFailure {
            message: format!("content hash mismatch: expected {}, got {}", expected, actual),
        })
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::test_runner::Config as ProptestConfig;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        /// Identical bytes give identical fingerprints and hex survives parsing
        #[test]
        fn fingerprint_determinism(content in prop::collection::vec(any::<u8>(), 0..1000)) {
            let first = fingerprint(&content);
            let second = fingerprint(&content);
            prop_assert_eq!(first, second);

            let restored = Fingerprint::from_hex(&first.to_hex()).unwrap();
            prop_assert_eq!(first, restored);
        }

        /// Keys are always two levels of two hex characters above the digest
        #[test]
        fn storage_key_shape(content in prop::collection::vec(any::<u8>(), 0..256)) {
            let fp = fingerprint(&content);
            let key = fp.storage_key();
            let parts: Vec<&str> = key.split('/').collect();
            prop_assert_eq!(parts.len(), 3);
            prop_assert_eq!(parts[0].len(), 2);
            prop_assert_eq!(parts[1].len(), 2);
            let prefix = format!("{}{}", parts[0], parts[1]);
            prop_assert!(parts[2].starts_with(&prefix));
        }
    }
}
