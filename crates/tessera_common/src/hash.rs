//! Content hashing for cache invalidation.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A 256-bit SHA-256 content digest.
///
/// Two inputs with the same `ContentHash` are assumed to have identical
/// content. The all-zero value is reserved as [`ContentHash::UNAVAILABLE`]
/// and marks a digest that could not be computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

/// Error returned when parsing a [`ContentHash`] from its hex form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash '{input}': expected 64 hex characters")]
pub struct ParseHashError {
    /// The rejected input.
    pub input: String,
}

impl ContentHash {
    /// Sentinel for a digest that could not be computed.
    ///
    /// Never treated as matching anything, including itself, by
    /// [`ContentHash::matches`].
    pub const UNAVAILABLE: ContentHash = ContentHash([0; 32]);

    /// Computes a content hash from a byte slice using SHA-256.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns `false` for [`ContentHash::UNAVAILABLE`].
    pub fn is_available(&self) -> bool {
        *self != Self::UNAVAILABLE
    }

    /// Equality that refuses to vouch for unavailable digests.
    pub fn matches(&self, other: &ContentHash) -> bool {
        self.is_available() && other.is_available() && self == other
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHashError {
            input: s.to_string(),
        };
        let bytes = hex::decode(s).map_err(|_| err())?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| err())?;
        Ok(Self(array))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
