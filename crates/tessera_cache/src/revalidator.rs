//! One revalidation run, from the orchestrator's side.
//!
//! A [`Revalidator`] owns the cache store for the duration of a run:
//!
//! 1. [`Revalidator::open`] fingerprints the configuration, loads the store
//!    and prunes blocks that left the configuration.
//! 2. [`Revalidator::plan`] scans every block (in parallel) and decides
//!    every validator.
//! 3. The orchestrator runs what must run and hands results back through
//!    [`Revalidator::record`].
//! 4. [`Revalidator::finish`] stores the new fingerprint and flushes once.
//!
//! Scanning is the only parallel phase. All store mutation goes through
//! `&mut self`, so there is exactly one writer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tessera_common::ContentHash;
use tessera_config::LoadedConfig;
use tracing::{debug, warn};

use crate::fingerprint::{block_config_digest, ConfigurationFingerprint};
use crate::hasher::{BlockScan, ContentHasher};
use crate::policy::{BlockVerdict, PolicyInput, RevalidationPolicy, ValidatorRegistry};
use crate::store::{CacheStore, LoadOutcome};
use crate::types::{BlockCacheEntry, CachedValidatorResult, Issue};

/// Per-run knobs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RevalidatorOptions {
    /// Rerun every validator regardless of the cache.
    pub force: bool,
    /// Restrict the run to these validators instead of `[validators].enabled`.
    pub validators: Option<Vec<String>>,
    /// Size of the scan pool; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

/// The scan and verdict for one block.
#[derive(Debug, Clone)]
pub struct BlockPlan {
    /// Block name.
    pub block_name: String,
    /// Block directory relative to the project root.
    pub block_path: String,
    /// Current file digests.
    pub scan: BlockScan,
    /// Digest of the block's complete configuration table.
    pub config_digest: ContentHash,
    /// Run-or-skip decisions.
    pub verdict: BlockVerdict,
}

impl BlockPlan {
    /// Builds a fresh validator result pinned to this plan's content digest.
    pub fn result(
        &self,
        passed: bool,
        rules_applied: Vec<String>,
        issues: Vec<Issue>,
    ) -> CachedValidatorResult {
        CachedValidatorResult {
            passed,
            digest_at_run: self.scan.content_digest,
            rules_applied,
            issues,
        }
    }
}

/// Counts across all planned blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Blocks planned.
    pub blocks: usize,
    /// Blocks whose validators are all served from cache.
    pub blocks_skipped: usize,
    /// Validator invocations required.
    pub validators_run: usize,
    /// Validator invocations served from cache.
    pub validators_skipped: usize,
}

impl RunSummary {
    /// Tallies a set of plans.
    pub fn from_plans(plans: &[BlockPlan]) -> Self {
        let mut summary = Self::default();
        for plan in plans {
            summary.blocks += 1;
            if plan.verdict.all_skipped {
                summary.blocks_skipped += 1;
            }
            for decision in &plan.verdict.decisions {
                if decision.should_run {
                    summary.validators_run += 1;
                } else {
                    summary.validators_skipped += 1;
                }
            }
        }
        summary
    }
}

/// Drives the cache for one validation run.
pub struct Revalidator<'a> {
    root: PathBuf,
    loaded: &'a LoadedConfig,
    options: RevalidatorOptions,
    registry: ValidatorRegistry,
    validators: Vec<String>,
    fingerprint: ConfigurationFingerprint,
    store: CacheStore,
    run_id: String,

    /// Validators each planned block must rerun, cleared by `record`.
    pending: BTreeMap<String, Vec<String>>,
}

impl<'a> Revalidator<'a> {
    /// Starts a run for the project at `root`.
    pub fn open(root: &Path, loaded: &'a LoadedConfig, options: RevalidatorOptions) -> Self {
        let config = &loaded.config;
        let fingerprint = ConfigurationFingerprint::compute(loaded);

        let mut store = CacheStore::load(root, &config.cache);
        store.initialize_if_absent(fingerprint.clone());
        let names: BTreeSet<String> = config.blocks.keys().cloned().collect();
        store.prune_blocks(&names);

        let validators = options
            .validators
            .clone()
            .unwrap_or_else(|| config.validators.enabled.clone());

        Self {
            root: root.to_path_buf(),
            loaded,
            registry: ValidatorRegistry::from_config(&config.validators),
            validators,
            fingerprint,
            store,
            run_id: uuid::Uuid::new_v4().to_string(),
            pending: BTreeMap::new(),
            options,
        }
    }

    /// Scans every configured block and decides every validator.
    pub fn plan(&mut self) -> Vec<BlockPlan> {
        let scans = self.scan_all();

        let mut plans = Vec::with_capacity(scans.len());
        for (name, path, scan) in scans {
            let verdict = RevalidationPolicy::decide(&PolicyInput {
                block_name: &name,
                scan: &scan,
                current: &self.fingerprint,
                stored: self.store.stored_state(),
                force: self.options.force,
                validators: &self.validators,
                registry: &self.registry,
            });
            debug!(block = %name, summary = %verdict.summary, "planned block");

            let to_run: Vec<String> = verdict.to_run().map(String::from).collect();
            if to_run.is_empty() {
                self.pending.remove(&name);
            } else {
                self.pending.insert(name.clone(), to_run);
            }

            plans.push(BlockPlan {
                config_digest: block_config_digest(self.loaded, &name),
                block_name: name,
                block_path: path,
                scan,
                verdict,
            });
        }
        plans
    }

    /// Records the outcome of running a block's validators.
    ///
    /// Skipped validators keep their cached result. Validators that had to
    /// run take their entry from `fresh`; one with no fresh result loses its
    /// old result, so a failed or interrupted validator is never served
    /// stale. A block that was entirely skipped and brings no fresh results
    /// leaves the store untouched.
    pub fn record(&mut self, plan: &BlockPlan, mut fresh: BTreeMap<String, CachedValidatorResult>) {
        self.pending.remove(&plan.block_name);
        if plan.verdict.all_skipped && fresh.is_empty() {
            return;
        }

        let mut results = BTreeMap::new();
        for decision in &plan.verdict.decisions {
            let id = &decision.validator_id;
            let result = if decision.should_run {
                fresh.remove(id)
            } else {
                decision.cached_result.clone()
            };
            match result {
                Some(result) if result.digest_at_run == plan.scan.content_digest => {
                    results.insert(id.clone(), result);
                }
                Some(_) => {
                    warn!(block = %plan.block_name, validator = %id, "result pinned to other content, not cached");
                }
                None => {}
            }
        }

        self.store.put_block_entry(BlockCacheEntry {
            block_name: plan.block_name.clone(),
            block_path: plan.block_path.clone(),
            files: plan.scan.files.clone(),
            content_digest: plan.scan.content_digest,
            config_digest: plan.config_digest,
            last_validated_at: Utc::now(),
            last_run_id: self.run_id.clone(),
            validator_results: results,
        });
    }

    /// Ends the run: drops results the orchestrator never replaced, stores
    /// the new fingerprint and flushes. Returns whether the file was written.
    pub fn finish(mut self) -> bool {
        for (block, validators) in std::mem::take(&mut self.pending) {
            let Some(mut entry) = self.store.get_block_entry(&block).cloned() else {
                continue;
            };
            let before = entry.validator_results.len();
            entry
                .validator_results
                .retain(|id, _| !validators.contains(id));
            if entry.validator_results.len() != before {
                debug!(block = %block, "dropping results that were due to rerun");
                self.store.put_block_entry(entry);
            }
        }

        let unchanged = self
            .store
            .cache()
            .is_some_and(|c| c.config_fingerprint == self.fingerprint);
        if !unchanged {
            self.store.update_fingerprint(self.fingerprint.clone());
        }
        self.store.flush()
    }

    /// The configuration fingerprint of this run.
    pub fn fingerprint(&self) -> &ConfigurationFingerprint {
        &self.fingerprint
    }

    /// The underlying store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// How the cache was obtained at the start of the run.
    pub fn load_outcome(&self) -> LoadOutcome {
        self.store.load_outcome()
    }

    /// Unique identifier of this run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Validators decided for every block, in order.
    pub fn validators(&self) -> &[String] {
        &self.validators
    }

    fn scan_all(&self) -> Vec<(String, String, BlockScan)> {
        let skip = vec![self.root.join(&self.loaded.config.cache.dir)];
        let blocks: Vec<(&String, &String)> = self
            .loaded
            .config
            .blocks
            .iter()
            .map(|(name, def)| (name, &def.path))
            .collect();

        let scan = |(name, path): &(&String, &String)| {
            let dir = self.root.join(path.as_str());
            ((*name).clone(), (*path).clone(), ContentHasher::scan_block(&dir, &skip))
        };

        match self.options.threads {
            None => blocks.par_iter().map(scan).collect(),
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| blocks.par_iter().map(scan).collect()),
                Err(err) => {
                    warn!(error = %err, "cannot build scan pool, scanning sequentially");
                    blocks.iter().map(scan).collect()
                }
            },
        }
    }
}
