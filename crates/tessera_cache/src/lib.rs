//! Incremental revalidation engine.
//!
//! Decides, for every block and every configured validator, whether a prior
//! validation result can be reused or must be recomputed. Staleness is
//! tracked along two axes: the content of the files under a block's
//! directory, and named slices of the project configuration document.
//!
//! Data flows one way: [`hasher`] → [`policy`] → [`store`] → disk. The
//! [`revalidator`] module ties these together for an orchestrator.

#![warn(missing_docs)]

pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod policy;
pub mod revalidator;
pub mod store;
pub mod types;

pub use error::CacheError;
pub use fingerprint::{BlockFingerprint, ConfigSlice, ConfigurationFingerprint};
pub use hasher::{BlockScan, ContentHasher};
pub use policy::{
    BlockVerdict, PolicyInput, Reason, RevalidationPolicy, ValidatorDecision, ValidatorKind,
    ValidatorRegistry,
};
pub use revalidator::{BlockPlan, Revalidator, RevalidatorOptions, RunSummary};
pub use store::{CacheStore, LoadOutcome, CACHE_FILE};
pub use types::{
    BlockCacheEntry, CachedValidatorResult, FileDigest, Issue, IssueSeverity, StoredState,
    ValidationCache, CACHE_SCHEMA_VERSION,
};
