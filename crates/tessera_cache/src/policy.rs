//! The revalidation decision.
//!
//! [`RevalidationPolicy::decide`] is a pure function of the current block
//! scan, the current configuration fingerprint, and whatever the cache store
//! holds. For every validator it answers skip (handing back the cached
//! result) or rerun, with exactly one reason. Rules are evaluated in a fixed
//! order and the first match wins:
//!
//! 1. unusable cache, foreign schema version or malformed entry → `cache_corrupted`
//! 2. force flag → `force_flag`
//! 3. no entry for the block → `first_run`
//! 4. block content changed or unreadable → `files_changed`
//! 5. per validator: `always_run`, `unmapped`, the first changed
//!    configuration slice the validator depends on, a missing or stale
//!    stored result, and finally `cached`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use tessera_common::ContentHash;
use tessera_config::{ValidatorCategory, ValidatorsConfig};
use tracing::warn;

use crate::fingerprint::{ConfigSlice, ConfigurationFingerprint};
use crate::hasher::BlockScan;
use crate::types::{BlockCacheEntry, CachedValidatorResult, StoredState, ValidationCache};

/// How the policy knows a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    /// Declared with a dependency category.
    Mapped(ValidatorCategory),
    /// Not declared anywhere; its dependency surface is unknown.
    Unmapped,
}

/// Validator id → dependency category table.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    categories: HashMap<String, ValidatorCategory>,
}

impl ValidatorRegistry {
    /// The built-in validators.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("schema", ValidatorCategory::SchemaShape);
        registry.register("shape", ValidatorCategory::SchemaShape);
        registry.register("semantic", ValidatorCategory::DomainSemantic);
        registry.register("domain", ValidatorCategory::DomainSemantic);
        registry
    }

    /// The built-in validators plus the `[validators.categories]` declarations,
    /// which take precedence.
    pub fn from_config(config: &ValidatorsConfig) -> Self {
        let mut registry = Self::builtin();
        for (id, category) in &config.categories {
            registry.register(id, *category);
        }
        registry
    }

    /// Declares or redeclares a validator's category.
    pub fn register(&mut self, id: impl Into<String>, category: ValidatorCategory) {
        self.categories.insert(id.into(), category);
    }

    /// Looks up a validator.
    pub fn kind(&self, id: &str) -> ValidatorKind {
        self.categories
            .get(id)
            .map_or(ValidatorKind::Unmapped, |c| ValidatorKind::Mapped(*c))
    }
}

/// Configuration slices a category depends on, in tie-break order. Content
/// is an implicit dependency of every category.
///
/// No category depends on `[validators]`: enabling or recategorizing a
/// validator affects which validators run, not what any of them check.
fn dependencies(category: ValidatorCategory) -> &'static [ConfigSlice] {
    match category {
        ValidatorCategory::SchemaShape => &[ConfigSlice::BlockDefinition],
        ValidatorCategory::DomainSemantic => &[
            ConfigSlice::Philosophy,
            ConfigSlice::Domain,
            ConfigSlice::AiConfig,
            ConfigSlice::GlobalRules,
            ConfigSlice::BlockRules,
        ],
        ValidatorCategory::AlwaysRun => &[],
    }
}

/// Why a validator runs or is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Reason {
    /// No trustworthy cache was available.
    CacheCorrupted,
    /// The caller forced a rerun.
    ForceFlag,
    /// The block has never been validated.
    FirstRun,
    /// Files under the block were modified, added, removed or are unreadable.
    FilesChanged {
        /// Affected paths relative to the block directory, sorted.
        changed_paths: Vec<String>,
    },
    /// `[philosophy]` changed.
    PhilosophyChanged,
    /// `[domain]` changed.
    DomainChanged,
    /// `[ai]` changed.
    AiConfigChanged,
    /// `[validators]` changed.
    ValidatorsChanged,
    /// `[rules]` changed.
    GlobalRulesChanged,
    /// The block's own rules changed.
    BlockRulesChanged,
    /// The block's definition, inputs or outputs changed.
    BlockDefinitionChanged,
    /// The block was validated before, but never by this validator.
    ResultMissing,
    /// The stored result was computed against other content.
    ResultStale,
    /// The validator is never served from cache.
    AlwaysRun,
    /// The validator has no declared dependencies.
    Unmapped,
    /// Nothing the validator depends on changed.
    Cached,
}

impl Reason {
    /// The snake_case reason identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::CacheCorrupted => "cache_corrupted",
            Reason::ForceFlag => "force_flag",
            Reason::FirstRun => "first_run",
            Reason::FilesChanged { .. } => "files_changed",
            Reason::PhilosophyChanged => "philosophy_changed",
            Reason::DomainChanged => "domain_changed",
            Reason::AiConfigChanged => "ai_config_changed",
            Reason::ValidatorsChanged => "validators_changed",
            Reason::GlobalRulesChanged => "global_rules_changed",
            Reason::BlockRulesChanged => "block_rules_changed",
            Reason::BlockDefinitionChanged => "block_definition_changed",
            Reason::ResultMissing => "result_missing",
            Reason::ResultStale => "result_stale",
            Reason::AlwaysRun => "always_run",
            Reason::Unmapped => "unmapped",
            Reason::Cached => "cached",
        }
    }
}

impl From<ConfigSlice> for Reason {
    fn from(slice: ConfigSlice) -> Self {
        match slice {
            ConfigSlice::Philosophy => Reason::PhilosophyChanged,
            ConfigSlice::Domain => Reason::DomainChanged,
            ConfigSlice::AiConfig => Reason::AiConfigChanged,
            ConfigSlice::Validators => Reason::ValidatorsChanged,
            ConfigSlice::GlobalRules => Reason::GlobalRulesChanged,
            ConfigSlice::BlockRules => Reason::BlockRulesChanged,
            ConfigSlice::BlockDefinition => Reason::BlockDefinitionChanged,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::CacheCorrupted => write!(f, "cache missing or corrupted"),
            Reason::ForceFlag => write!(f, "forced"),
            Reason::FirstRun => write!(f, "first run"),
            Reason::FilesChanged { changed_paths } => match changed_paths.as_slice() {
                [] => write!(f, "files changed"),
                [one] => write!(f, "file changed: {one}"),
                [first, rest @ ..] => write!(f, "files changed: {first} and {} more", rest.len()),
            },
            Reason::PhilosophyChanged => write!(f, "philosophy changed"),
            Reason::DomainChanged => write!(f, "domain changed"),
            Reason::AiConfigChanged => write!(f, "AI configuration changed"),
            Reason::ValidatorsChanged => write!(f, "validator configuration changed"),
            Reason::GlobalRulesChanged => write!(f, "global rules changed"),
            Reason::BlockRulesChanged => write!(f, "block rules changed"),
            Reason::BlockDefinitionChanged => write!(f, "block definition changed"),
            Reason::ResultMissing => write!(f, "no cached result"),
            Reason::ResultStale => write!(f, "cached result is stale"),
            Reason::AlwaysRun => write!(f, "always runs"),
            Reason::Unmapped => write!(f, "unknown dependencies"),
            Reason::Cached => write!(f, "unchanged"),
        }
    }
}

/// Run-or-skip verdict for one validator against one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorDecision {
    /// The validator.
    pub validator_id: String,
    /// Whether the validator must run.
    pub should_run: bool,
    /// Why.
    pub reason: Reason,
    /// The reusable result; present only when `should_run` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_result: Option<CachedValidatorResult>,
}

impl ValidatorDecision {
    fn run(id: &str, reason: Reason) -> Self {
        Self {
            validator_id: id.to_string(),
            should_run: true,
            reason,
            cached_result: None,
        }
    }

    fn skip(id: &str, result: &CachedValidatorResult) -> Self {
        Self {
            validator_id: id.to_string(),
            should_run: false,
            reason: Reason::Cached,
            cached_result: Some(result.clone()),
        }
    }
}

/// All decisions for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockVerdict {
    /// The block.
    pub block_name: String,
    /// One decision per configured validator, in configuration order.
    pub decisions: Vec<ValidatorDecision>,
    /// `true` iff every decision is a skip.
    pub all_skipped: bool,
    /// One-line description for reporting.
    pub summary: String,
}

impl BlockVerdict {
    fn new(block_name: &str, decisions: Vec<ValidatorDecision>) -> Self {
        let all_skipped = decisions.iter().all(|d| !d.should_run);
        let summary = summarize(&decisions);
        Self {
            block_name: block_name.to_string(),
            decisions,
            all_skipped,
            summary,
        }
    }

    /// Ids of the validators that must run.
    pub fn to_run(&self) -> impl Iterator<Item = &str> {
        self.decisions
            .iter()
            .filter(|d| d.should_run)
            .map(|d| d.validator_id.as_str())
    }
}

/// Everything the policy looks at for one block.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    /// The block being decided.
    pub block_name: &'a str,
    /// Freshly computed file digests.
    pub scan: &'a BlockScan,
    /// Freshly computed configuration fingerprint.
    pub current: &'a ConfigurationFingerprint,
    /// What the cache store holds.
    pub stored: StoredState<'a>,
    /// Explicit user override.
    pub force: bool,
    /// Validators configured to run, in order.
    pub validators: &'a [String],
    /// Validator categories.
    pub registry: &'a ValidatorRegistry,
}

/// The run-or-skip decision procedure.
pub struct RevalidationPolicy;

impl RevalidationPolicy {
    /// Decides every validator for one block.
    pub fn decide(input: &PolicyInput<'_>) -> BlockVerdict {
        let decisions = match Self::block_gate(input) {
            Err(reason) => input
                .validators
                .iter()
                .map(|id| ValidatorDecision::run(id, reason.clone()))
                .collect(),
            Ok((cache, entry)) => {
                let config_unchanged = input.current.full_matches(&cache.config_fingerprint);
                input
                    .validators
                    .iter()
                    .map(|id| Self::decide_validator(id, input, cache, entry, config_unchanged))
                    .collect()
            }
        };
        BlockVerdict::new(input.block_name, decisions)
    }

    /// Rules 1–4, which apply to the whole block. `Err` carries the reason
    /// every validator reruns for.
    fn block_gate<'a>(
        input: &PolicyInput<'a>,
    ) -> Result<(&'a ValidationCache, &'a BlockCacheEntry), Reason> {
        let StoredState::Available(cache) = input.stored else {
            return Err(Reason::CacheCorrupted);
        };
        if !cache.is_current_version() {
            return Err(Reason::CacheCorrupted);
        }
        let entry = cache.blocks.get(input.block_name);
        if let Some(entry) = entry {
            if entry.block_name != input.block_name || !entry.is_well_formed() {
                warn!(block = input.block_name, "malformed cache entry");
                return Err(Reason::CacheCorrupted);
            }
        }
        if input.force {
            return Err(Reason::ForceFlag);
        }
        let entry = entry.ok_or(Reason::FirstRun)?;

        let scan = input.scan;
        if !scan.unreadable.is_empty() || !scan.content_digest.matches(&entry.content_digest) {
            return Err(Reason::FilesChanged {
                changed_paths: changed_paths(scan, entry),
            });
        }
        Ok((cache, entry))
    }

    /// Rule 5 for a single validator, once block content is known unchanged.
    fn decide_validator(
        id: &str,
        input: &PolicyInput<'_>,
        cache: &ValidationCache,
        entry: &BlockCacheEntry,
        config_unchanged: bool,
    ) -> ValidatorDecision {
        let category = match input.registry.kind(id) {
            ValidatorKind::Unmapped => {
                warn!(validator = id, "validator has no dependency mapping, rerunning");
                return ValidatorDecision::run(id, Reason::Unmapped);
            }
            ValidatorKind::Mapped(ValidatorCategory::AlwaysRun) => {
                return ValidatorDecision::run(id, Reason::AlwaysRun);
            }
            ValidatorKind::Mapped(category) => category,
        };

        if !config_unchanged {
            let changed = input.current.first_changed(
                &cache.config_fingerprint,
                input.block_name,
                dependencies(category),
            );
            if let Some(slice) = changed {
                return ValidatorDecision::run(id, slice.into());
            }
        }

        match entry.validator_results.get(id) {
            None => ValidatorDecision::run(id, Reason::ResultMissing),
            Some(result) if !result.digest_at_run.matches(&input.scan.content_digest) => {
                ValidatorDecision::run(id, Reason::ResultStale)
            }
            Some(result) => ValidatorDecision::skip(id, result),
        }
    }
}

/// Paths whose digest differs, that were added or removed, or that could
/// not be read.
pub fn changed_paths(scan: &BlockScan, entry: &BlockCacheEntry) -> Vec<String> {
    let stored: BTreeMap<&str, ContentHash> = entry
        .files
        .iter()
        .map(|f| (f.relative_path.as_str(), f.digest))
        .collect();
    let current: BTreeMap<&str, ContentHash> = scan
        .files
        .iter()
        .map(|f| (f.relative_path.as_str(), f.digest))
        .collect();

    let mut changed: BTreeSet<&str> = BTreeSet::new();
    for (path, digest) in &current {
        if stored.get(path) != Some(digest) {
            changed.insert(*path);
        }
    }
    changed.extend(stored.keys().filter(|p| !current.contains_key(*p)));
    changed.extend(scan.unreadable.iter().map(String::as_str));
    changed.into_iter().map(String::from).collect()
}

fn summarize(decisions: &[ValidatorDecision]) -> String {
    if decisions.is_empty() {
        return "no validators configured".to_string();
    }
    let total = decisions.len();
    let mut codes: Vec<&str> = Vec::new();
    for d in decisions.iter().filter(|d| d.should_run) {
        if !codes.contains(&d.reason.code()) {
            codes.push(d.reason.code());
        }
    }
    if codes.is_empty() {
        return format!("all {total} validator(s) cached");
    }
    let running = decisions.iter().filter(|d| d.should_run).count();
    format!("rerunning {running} of {total}: {}", codes.join(", "))
}
