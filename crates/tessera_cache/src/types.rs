//! The persisted validation cache model.
//!
//! One [`ValidationCache`] per project, serialized as camelCase JSON. Every
//! map is a `BTreeMap` so that serializing the same state twice yields the
//! same bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;

use crate::fingerprint::ConfigurationFingerprint;
use crate::hasher::ContentHasher;

/// Schema version written into every cache file. A file carrying any other
/// version is discarded, never partially trusted.
pub const CACHE_SCHEMA_VERSION: &str = "1";

/// Digest and metadata for one file under a block's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDigest {
    /// Path relative to the block directory, `/`-separated.
    pub relative_path: String,
    /// SHA-256 of the file bytes.
    pub digest: ContentHash,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Modification time in milliseconds since the Unix epoch (0 if unknown).
    pub modified_at_ms: u64,
}

/// Severity of a validator finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Fails the validator.
    Error,
    /// Reported but does not fail.
    Warning,
    /// Informational.
    Info,
}

/// A single finding reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// How severe the finding is.
    pub severity: IssueSeverity,
    /// Human-readable description.
    pub message: String,
    /// File the finding refers to, relative to the block directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Rule that produced the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

/// The stored outcome of one validator against one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedValidatorResult {
    /// Whether the validator passed.
    pub passed: bool,
    /// Block content digest the result was computed against.
    pub digest_at_run: ContentHash,
    /// Rules the validator evaluated.
    #[serde(default)]
    pub rules_applied: Vec<String>,
    /// Findings reported by the validator.
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Last known state of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCacheEntry {
    /// Block name, as keyed in the configuration.
    pub block_name: String,
    /// Block directory relative to the project root.
    pub block_path: String,
    /// Every file under the block directory, sorted by relative path.
    pub files: Vec<FileDigest>,
    /// Combined digest of `files`.
    pub content_digest: ContentHash,
    /// Digest of the block's complete configuration definition.
    pub config_digest: ContentHash,
    /// When the entry was last written.
    pub last_validated_at: DateTime<Utc>,
    /// Identifier of the run that last wrote the entry.
    pub last_run_id: String,
    /// Per-validator results keyed by validator id.
    #[serde(default)]
    pub validator_results: BTreeMap<String, CachedValidatorResult>,
}

impl BlockCacheEntry {
    /// Checks the structural invariants a hand-edited or truncated entry
    /// could break. A malformed entry must not be trusted.
    pub fn is_well_formed(&self) -> bool {
        if self.block_name.is_empty() {
            return false;
        }
        let sorted = self
            .files
            .windows(2)
            .all(|w| w[0].relative_path < w[1].relative_path);
        if !sorted {
            return false;
        }
        let digests: Vec<ContentHash> = self.files.iter().map(|f| f.digest).collect();
        if ContentHasher::combine_digests(&digests) != self.content_digest {
            return false;
        }
        self.validator_results
            .values()
            .all(|r| r.digest_at_run.is_available())
    }
}

/// Top-level persisted aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCache {
    /// Schema version; see [`CACHE_SCHEMA_VERSION`].
    pub version: String,
    /// When the aggregate was first created.
    pub created_at: DateTime<Utc>,
    /// When the aggregate was last flushed.
    pub updated_at: DateTime<Utc>,
    /// Configuration fingerprint of the run that last flushed.
    pub config_fingerprint: ConfigurationFingerprint,
    /// Entries keyed by block name.
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockCacheEntry>,
}

impl ValidationCache {
    /// Creates an empty aggregate at the current schema version.
    pub fn new(fingerprint: ConfigurationFingerprint) -> Self {
        let now = Utc::now();
        Self {
            version: CACHE_SCHEMA_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            config_fingerprint: fingerprint,
            blocks: BTreeMap::new(),
        }
    }

    /// Returns `true` if this aggregate was written at the current schema version.
    pub fn is_current_version(&self) -> bool {
        self.version == CACHE_SCHEMA_VERSION
    }
}

/// What the policy may rely on from the cache store.
#[derive(Debug, Clone, Copy)]
pub enum StoredState<'a> {
    /// Nothing trustworthy was loaded: the file was corrupt, had a foreign
    /// schema version, or the store was never initialized.
    Unusable,
    /// A usable aggregate, possibly freshly initialized and empty.
    Available(&'a ValidationCache),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &[u8]) -> FileDigest {
        FileDigest {
            relative_path: path.to_string(),
            digest: ContentHash::from_bytes(content),
            size_bytes: content.len() as u64,
            modified_at_ms: 0,
        }
    }

    fn entry(files: Vec<FileDigest>) -> BlockCacheEntry {
        let digests: Vec<ContentHash> = files.iter().map(|f| f.digest).collect();
        BlockCacheEntry {
            block_name: "orders".to_string(),
            block_path: "blocks/orders".to_string(),
            content_digest: ContentHasher::combine_digests(&digests),
            files,
            config_digest: ContentHash::from_bytes(b"def"),
            last_validated_at: Utc::now(),
            last_run_id: "run-1".to_string(),
            validator_results: BTreeMap::new(),
        }
    }

    #[test]
    fn well_formed_entry() {
        let e = entry(vec![file("a.rs", b"a"), file("b.rs", b"b")]);
        assert!(e.is_well_formed());
    }

    #[test]
    fn empty_entry_is_well_formed() {
        assert!(entry(vec![]).is_well_formed());
    }

    #[test]
    fn unsorted_files_are_malformed() {
        let mut e = entry(vec![file("a.rs", b"a"), file("b.rs", b"b")]);
        e.files.swap(0, 1);
        assert!(!e.is_well_formed());
    }

    #[test]
    fn tampered_content_digest_is_malformed() {
        let mut e = entry(vec![file("a.rs", b"a")]);
        e.content_digest = ContentHash::from_bytes(b"something else");
        assert!(!e.is_well_formed());
    }

    #[test]
    fn unavailable_result_digest_is_malformed() {
        let mut e = entry(vec![file("a.rs", b"a")]);
        e.validator_results.insert(
            "schema".to_string(),
            CachedValidatorResult {
                passed: true,
                digest_at_run: ContentHash::UNAVAILABLE,
                rules_applied: vec![],
                issues: vec![],
            },
        );
        assert!(!e.is_well_formed());
    }

    #[test]
    fn entry_serializes_camel_case() {
        let e = entry(vec![file("a.rs", b"a")]);
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("blockName").is_some());
        assert!(json.get("contentDigest").is_some());
        assert!(json["files"][0].get("relativePath").is_some());
        assert!(json["files"][0].get("modifiedAtMs").is_some());
    }

    #[test]
    fn issue_omits_absent_location() {
        let issue = Issue {
            severity: IssueSeverity::Warning,
            message: "block exposes no outputs".to_string(),
            file: None,
            rule: None,
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert_eq!(
            json,
            r#"{"severity":"warning","message":"block exposes no outputs"}"#
        );
    }

    #[test]
    fn new_cache_is_current_version() {
        let cache = ValidationCache::new(ConfigurationFingerprint::default());
        assert!(cache.is_current_version());
        assert!(cache.blocks.is_empty());
        assert_eq!(cache.created_at, cache.updated_at);
    }
}
