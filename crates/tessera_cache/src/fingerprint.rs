//! Configuration fingerprints.
//!
//! A fingerprint is a set of digests over disjoint, named slices of the
//! project configuration document, plus one digest over the whole document
//! used as a fast-path equality check. Validators declare which slices they
//! depend on; a change to any other slice does not invalidate them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;
use tessera_config::LoadedConfig;
use tracing::warn;

use crate::hasher::ContentHasher;

// Top-level sections of `tessera.toml`.
const PHILOSOPHY_SECTION: &str = "philosophy";
const DOMAIN_SECTION: &str = "domain";
const AI_SECTION: &str = "ai";
const VALIDATORS_SECTION: &str = "validators";
const RULES_SECTION: &str = "rules";
const BLOCKS_SECTION: &str = "blocks";

// Keys of a block table that belong to slices other than its definition.
const BLOCK_RULES_KEY: &str = "rules";
const BLOCK_INPUTS_KEY: &str = "inputs";
const BLOCK_OUTPUTS_KEY: &str = "outputs";

/// Digests of one block's configuration slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFingerprint {
    /// The block table without its rules, inputs and outputs.
    pub definition_digest: ContentHash,
    /// The block's own domain rules; `None` when it declares none.
    #[serde(default)]
    pub domain_rules_digest: Option<ContentHash>,
    /// The block's inputs and outputs together.
    pub inputs_outputs_digest: ContentHash,
}

/// Digests over the named slices of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationFingerprint {
    /// The whole document.
    pub full_digest: ContentHash,
    /// `[philosophy]`.
    pub philosophy_digest: ContentHash,
    /// `[domain]`.
    pub domain_digest: ContentHash,
    /// `[ai]`.
    pub ai_config_digest: ContentHash,
    /// `[validators]`.
    pub validators_digest: ContentHash,
    /// `[rules]`, the global domain rules.
    pub global_rules_digest: ContentHash,
    /// Per-block slices, only for blocks present in the configuration.
    #[serde(default)]
    pub per_block: BTreeMap<String, BlockFingerprint>,
}

impl Default for ConfigurationFingerprint {
    /// A fingerprint that matches nothing.
    fn default() -> Self {
        Self {
            full_digest: ContentHash::UNAVAILABLE,
            philosophy_digest: ContentHash::UNAVAILABLE,
            domain_digest: ContentHash::UNAVAILABLE,
            ai_config_digest: ContentHash::UNAVAILABLE,
            validators_digest: ContentHash::UNAVAILABLE,
            global_rules_digest: ContentHash::UNAVAILABLE,
            per_block: BTreeMap::new(),
        }
    }
}

impl ConfigurationFingerprint {
    /// Fingerprints a loaded configuration.
    ///
    /// Never fails: a slice that cannot be digested gets
    /// [`ContentHash::UNAVAILABLE`], which compares as changed against
    /// everything, so the validators depending on it rerun.
    pub fn compute(loaded: &LoadedConfig) -> Self {
        let doc = &loaded.document;
        let blocks = doc.get(BLOCKS_SECTION).and_then(|v| v.as_table());

        let per_block = loaded
            .config
            .blocks
            .keys()
            .map(|name| {
                let table = blocks.and_then(|b| b.get(name)).and_then(|v| v.as_table());
                (name.clone(), block_fingerprint(name, table))
            })
            .collect();

        Self {
            full_digest: digest_or_unavailable("document", doc),
            philosophy_digest: section_digest(doc, PHILOSOPHY_SECTION),
            domain_digest: section_digest(doc, DOMAIN_SECTION),
            ai_config_digest: section_digest(doc, AI_SECTION),
            validators_digest: section_digest(doc, VALIDATORS_SECTION),
            global_rules_digest: section_digest(doc, RULES_SECTION),
            per_block,
        }
    }

    /// Fast path: `true` only if both whole-document digests are available
    /// and equal.
    pub fn full_matches(&self, other: &ConfigurationFingerprint) -> bool {
        self.full_digest.matches(&other.full_digest)
    }

    /// Returns the first slice in `slices` whose digest differs between
    /// `self` (current) and `stored` for the given block.
    pub fn first_changed(
        &self,
        stored: &ConfigurationFingerprint,
        block: &str,
        slices: &[ConfigSlice],
    ) -> Option<ConfigSlice> {
        slices
            .iter()
            .copied()
            .find(|slice| slice.changed(self, stored, block))
    }
}

/// Digest of a block's complete table, as stored in its cache entry.
pub fn block_config_digest(loaded: &LoadedConfig, block: &str) -> ContentHash {
    let table = loaded
        .document
        .get(BLOCKS_SECTION)
        .and_then(|v| v.as_table())
        .and_then(|b| b.get(block));
    digest_or_unavailable(block, &table)
}

/// A comparable slice of the configuration, in tie-break order.
///
/// When several slices changed at once, the earliest one in
/// [`ConfigSlice::ORDER`] names the rerun reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSlice {
    /// `[philosophy]`.
    Philosophy,
    /// `[domain]`.
    Domain,
    /// `[ai]`.
    AiConfig,
    /// `[validators]`.
    Validators,
    /// `[rules]`.
    GlobalRules,
    /// `[blocks.<name>.rules]`.
    BlockRules,
    /// `[blocks.<name>]` definition, inputs and outputs.
    BlockDefinition,
}

impl ConfigSlice {
    /// Every slice, in tie-break order.
    pub const ORDER: [ConfigSlice; 7] = [
        ConfigSlice::Philosophy,
        ConfigSlice::Domain,
        ConfigSlice::AiConfig,
        ConfigSlice::Validators,
        ConfigSlice::GlobalRules,
        ConfigSlice::BlockRules,
        ConfigSlice::BlockDefinition,
    ];

    /// Whether this slice differs between `current` and `stored` for `block`.
    ///
    /// A block missing from either fingerprint counts as changed.
    pub fn changed(
        &self,
        current: &ConfigurationFingerprint,
        stored: &ConfigurationFingerprint,
        block: &str,
    ) -> bool {
        let differs = |a: &ContentHash, b: &ContentHash| !a.matches(b);
        match self {
            ConfigSlice::Philosophy => {
                differs(&current.philosophy_digest, &stored.philosophy_digest)
            }
            ConfigSlice::Domain => differs(&current.domain_digest, &stored.domain_digest),
            ConfigSlice::AiConfig => differs(&current.ai_config_digest, &stored.ai_config_digest),
            ConfigSlice::Validators => {
                differs(&current.validators_digest, &stored.validators_digest)
            }
            ConfigSlice::GlobalRules => {
                differs(&current.global_rules_digest, &stored.global_rules_digest)
            }
            ConfigSlice::BlockRules | ConfigSlice::BlockDefinition => {
                let (Some(cur), Some(old)) =
                    (current.per_block.get(block), stored.per_block.get(block))
                else {
                    return true;
                };
                if *self == ConfigSlice::BlockRules {
                    match (&cur.domain_rules_digest, &old.domain_rules_digest) {
                        (None, None) => false,
                        (Some(a), Some(b)) => differs(a, b),
                        _ => true,
                    }
                } else {
                    differs(&cur.definition_digest, &old.definition_digest)
                        || differs(&cur.inputs_outputs_digest, &old.inputs_outputs_digest)
                }
            }
        }
    }
}

fn section_digest(doc: &toml::Table, section: &str) -> ContentHash {
    digest_or_unavailable(section, &doc.get(section))
}

fn block_fingerprint(name: &str, table: Option<&toml::Table>) -> BlockFingerprint {
    let Some(table) = table else {
        warn!(block = name, "block missing from configuration document");
        return BlockFingerprint {
            definition_digest: ContentHash::UNAVAILABLE,
            domain_rules_digest: Some(ContentHash::UNAVAILABLE),
            inputs_outputs_digest: ContentHash::UNAVAILABLE,
        };
    };

    let definition: BTreeMap<&str, &toml::Value> = table
        .iter()
        .filter(|(k, _)| {
            !matches!(
                k.as_str(),
                BLOCK_RULES_KEY | BLOCK_INPUTS_KEY | BLOCK_OUTPUTS_KEY
            )
        })
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    let inputs_outputs = (table.get(BLOCK_INPUTS_KEY), table.get(BLOCK_OUTPUTS_KEY));

    BlockFingerprint {
        definition_digest: digest_or_unavailable(name, &definition),
        domain_rules_digest: table
            .get(BLOCK_RULES_KEY)
            .map(|rules| digest_or_unavailable(name, rules)),
        inputs_outputs_digest: digest_or_unavailable(name, &inputs_outputs),
    }
}

fn digest_or_unavailable<T: Serialize + ?Sized>(name: &str, slice: &T) -> ContentHash {
    match ContentHasher::hash_config_slice(name, slice) {
        Ok(digest) => digest,
        Err(err) => {
            warn!(error = %err, "configuration slice treated as changed");
            ContentHash::UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_config::load_config_from_str;

    const BASE: &str = r#"
[project]
name = "shop"

[philosophy]
principles = ["small blocks"]

[domain]
entities = ["Order"]

[ai]
model = "reviewer"

[rules]
max_file_lines = 400

[blocks.orders]
path = "blocks/orders"
description = "Order lifecycle"
inputs = ["Cart"]
outputs = ["Order"]

[blocks.orders.rules]
no_direct_db = true

[blocks.billing]
path = "blocks/billing"
"#;

    fn fp(src: &str) -> ConfigurationFingerprint {
        ConfigurationFingerprint::compute(&load_config_from_str(src).unwrap())
    }

    #[test]
    fn formatting_does_not_change_fingerprint() {
        let reformatted = r#"
[project]
name="shop"
[rules]
max_file_lines=400
[ai]
model="reviewer"
[domain]
entities=[ "Order" ]
[philosophy]
principles=["small blocks"]
[blocks.billing]
path="blocks/billing"
[blocks.orders]
outputs=["Order"]
inputs=["Cart"]
description="Order lifecycle"
path="blocks/orders"
rules={ no_direct_db = true }
"#;
        assert_eq!(fp(BASE), fp(reformatted));
    }

    #[test]
    fn per_block_covers_configured_blocks() {
        let f = fp(BASE);
        assert_eq!(f.per_block.len(), 2);
        assert!(f.per_block["orders"].domain_rules_digest.is_some());
        assert!(f.per_block["billing"].domain_rules_digest.is_none());
    }

    #[test]
    fn philosophy_change_is_isolated() {
        let before = fp(BASE);
        let after = fp(&BASE.replace("small blocks", "large blocks"));
        assert_ne!(before.full_digest, after.full_digest);
        assert_ne!(before.philosophy_digest, after.philosophy_digest);
        assert_eq!(before.domain_digest, after.domain_digest);
        assert_eq!(before.per_block, after.per_block);
        assert_eq!(
            after.first_changed(&before, "orders", &ConfigSlice::ORDER),
            Some(ConfigSlice::Philosophy)
        );
    }

    #[test]
    fn block_slices_are_disjoint() {
        let before = fp(BASE);
        let rules_changed = fp(&BASE.replace("no_direct_db = true", "no_direct_db = false"));
        let io_changed = fp(&BASE.replace("inputs = [\"Cart\"]", "inputs = [\"Basket\"]"));

        let b = &before.per_block["orders"];
        let r = &rules_changed.per_block["orders"];
        let i = &io_changed.per_block["orders"];
        assert_eq!(b.definition_digest, r.definition_digest);
        assert_ne!(b.domain_rules_digest, r.domain_rules_digest);
        assert_eq!(b.definition_digest, i.definition_digest);
        assert_ne!(b.inputs_outputs_digest, i.inputs_outputs_digest);

        assert_eq!(
            rules_changed.first_changed(&before, "orders", &ConfigSlice::ORDER),
            Some(ConfigSlice::BlockRules)
        );
        assert_eq!(
            io_changed.first_changed(&before, "orders", &ConfigSlice::ORDER),
            Some(ConfigSlice::BlockDefinition)
        );
        assert_eq!(
            io_changed.first_changed(&before, "billing", &ConfigSlice::ORDER),
            None
        );
    }

    #[test]
    fn adding_a_section_is_a_change() {
        let without = fp("[project]\nname = \"shop\"\n");
        let with = fp("[project]\nname = \"shop\"\n\n[domain]\nentities = []\n");
        assert_ne!(without.domain_digest, with.domain_digest);
    }

    #[test]
    fn missing_stored_block_counts_as_changed() {
        let current = fp(BASE);
        let mut stored = current.clone();
        stored.per_block.remove("orders");
        assert!(ConfigSlice::BlockDefinition.changed(&current, &stored, "orders"));
        assert!(ConfigSlice::BlockRules.changed(&current, &stored, "orders"));
        assert!(!ConfigSlice::Philosophy.changed(&current, &stored, "orders"));
    }

    #[test]
    fn unavailable_digest_always_differs() {
        let current = fp(BASE);
        let mut broken = current.clone();
        broken.domain_digest = ContentHash::UNAVAILABLE;
        assert!(ConfigSlice::Domain.changed(&broken, &broken, "orders"));
        assert!(!ConfigurationFingerprint::default().full_matches(&ConfigurationFingerprint::default()));
    }

    #[test]
    fn first_changed_respects_order() {
        let before = fp(BASE);
        let after = fp(&BASE
            .replace("max_file_lines = 400", "max_file_lines = 300")
            .replace("model = \"reviewer\"", "model = \"other\""));
        assert_eq!(
            after.first_changed(&before, "orders", &ConfigSlice::ORDER),
            Some(ConfigSlice::AiConfig)
        );
        assert_eq!(
            after.first_changed(
                &before,
                "orders",
                &[ConfigSlice::GlobalRules, ConfigSlice::BlockRules]
            ),
            Some(ConfigSlice::GlobalRules)
        );
    }

    #[test]
    fn block_config_digest_covers_whole_block() {
        let a = load_config_from_str(BASE).unwrap();
        let b = load_config_from_str(&BASE.replace("no_direct_db = true", "no_direct_db = false"))
            .unwrap();
        assert_ne!(
            block_config_digest(&a, "orders"),
            block_config_digest(&b, "orders")
        );
        assert_eq!(
            block_config_digest(&a, "billing"),
            block_config_digest(&b, "billing")
        );
    }

    #[test]
    fn fingerprint_serde_uses_camel_case() {
        let json = serde_json::to_value(fp(BASE)).unwrap();
        assert!(json.get("aiConfigDigest").is_some());
        assert!(json["perBlock"]["orders"].get("inputsOutputsDigest").is_some());
    }
}
