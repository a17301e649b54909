//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// The cache layer is fail-safe: none of these reach the caller of the
/// public store or policy API. They are propagated internally and then
/// downgraded to a cache miss, a disabled store, or an always-differing
/// digest, with a warning logged.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing a file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The cache file could not be parsed as a validation cache document.
    #[error("failed to parse validation cache: {reason}")]
    CacheParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// The cache file was written by an incompatible schema version.
    #[error("cache schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The version this engine writes.
        expected: String,
        /// The version found in the file.
        actual: String,
    },

    /// A serialization error occurred while preparing the cache document.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A configuration slice could not be canonicalized for digesting.
    #[error("cannot digest configuration slice '{slice}': {reason}")]
    ConfigSlice {
        /// Name of the slice.
        slice: String,
        /// Description of the failure.
        reason: String,
    },
}
