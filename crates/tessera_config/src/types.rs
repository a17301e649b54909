//! Configuration types deserialized from `tessera.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// The top-level project configuration parsed from `tessera.toml`.
///
/// The free-form sections (`philosophy`, `domain`, `ai`, `rules`) are kept as
/// raw tables: their content only matters to the validators, and to the
/// revalidation engine as fingerprint input.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// Design principles the semantic validators check blocks against.
    #[serde(default)]
    pub philosophy: Option<toml::Table>,
    /// Domain model description (entities, vocabulary).
    #[serde(default)]
    pub domain: Option<toml::Table>,
    /// Settings for AI-backed validators (provider, model, prompts).
    #[serde(default)]
    pub ai: Option<toml::Table>,
    /// Global domain rules applied to every block unless overridden.
    #[serde(default)]
    pub rules: Option<toml::Table>,
    /// Which validators run and how each one is categorized.
    #[serde(default)]
    pub validators: ValidatorsConfig,
    /// Block definitions keyed by block name.
    #[serde(default)]
    pub blocks: BTreeMap<String, BlockDef>,
    /// Persistence settings for the validation cache.
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Core project metadata required in every `tessera.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// The project version string.
    #[serde(default)]
    pub version: String,
    /// A brief description of the project.
    #[serde(default)]
    pub description: String,
}

/// A block: a directory of source files plus its declared contract.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDef {
    /// Directory of the block, relative to the project root.
    pub path: String,
    /// Human description of the block's responsibility.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form block kind (e.g. "service", "library").
    #[serde(default)]
    pub kind: Option<String>,
    /// Declared inputs of the block.
    #[serde(default)]
    pub inputs: Option<toml::Value>,
    /// Declared outputs of the block.
    #[serde(default)]
    pub outputs: Option<toml::Value>,
    /// Block-specific domain rules.
    #[serde(default)]
    pub rules: Option<toml::Table>,
}

/// The `[validators]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsConfig {
    /// Validator identifiers to run against every block, in order.
    #[serde(default = "default_enabled_validators")]
    pub enabled: Vec<String>,
    /// Category declarations for validators beyond the built-in ones.
    #[serde(default)]
    pub categories: BTreeMap<String, ValidatorCategory>,
}

impl Default for ValidatorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_validators(),
            categories: BTreeMap::new(),
        }
    }
}

fn default_enabled_validators() -> Vec<String> {
    ["schema", "shape", "semantic"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// What a validator's result depends on, declared once per validator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorCategory {
    /// Structural checks over the block definition and its files.
    SchemaShape,
    /// AI-backed semantic checks against the domain and philosophy.
    DomainSemantic,
    /// Checks with external state; never served from cache.
    AlwaysRun,
}

/// The `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// When `false`, nothing is read from or written to disk.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache directory, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> String {
    ".tessera".to_string()
}
