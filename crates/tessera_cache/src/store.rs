//! Owner of the persisted validation cache.
//!
//! The store holds the in-memory [`ValidationCache`] for one run and is the
//! only path through which it is mutated. Every mutation marks the store
//! dirty; [`CacheStore::flush`] writes the whole document once, replacing
//! the previous file atomically.
//!
//! Nothing here returns an error to the caller. Read failures turn into an
//! absent cache, write failures disable the store for the rest of the run,
//! and both are logged as warnings.

use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tessera_config::CacheSettings;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::fingerprint::ConfigurationFingerprint;
use crate::types::{BlockCacheEntry, StoredState, ValidationCache, CACHE_SCHEMA_VERSION};

/// Name of the cache file within the cache directory.
pub const CACHE_FILE: &str = "validation-cache.json";

/// How the store came by its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Caching is switched off; nothing was read and nothing will be written.
    Disabled,
    /// No cache file existed.
    Missing,
    /// A current-version cache was loaded.
    Loaded,
    /// A cache file existed but was unreadable, corrupt or from another
    /// schema version, and was thrown away.
    Discarded,
}

/// Dirty-tracked owner of the validation cache for one project.
#[derive(Debug)]
pub struct CacheStore {
    /// Full path of the cache file.
    path: PathBuf,

    /// The aggregate, once loaded or initialized.
    cache: Option<ValidationCache>,

    outcome: LoadOutcome,
    dirty: bool,
    enabled: bool,
}

impl CacheStore {
    /// Returns the cache file path for a project root.
    pub fn cache_path(root: &Path, settings: &CacheSettings) -> PathBuf {
        root.join(&settings.dir).join(CACHE_FILE)
    }

    /// Loads the cache for `root`, or starts with nothing.
    ///
    /// A missing file, a parse failure and a schema version mismatch all
    /// yield an absent cache; only the latter two are reported as
    /// [`LoadOutcome::Discarded`]. Loading never touches the file: a
    /// discarded file stays on disk until the next [`CacheStore::flush`]
    /// replaces it.
    pub fn load(root: &Path, settings: &CacheSettings) -> Self {
        let path = Self::cache_path(root, settings);
        if !settings.enabled {
            return Self {
                path,
                cache: None,
                outcome: LoadOutcome::Disabled,
                dirty: false,
                enabled: false,
            };
        }

        let (cache, outcome) = match read_cache(&path) {
            Ok(Some(cache)) => (Some(cache), LoadOutcome::Loaded),
            Ok(None) => (None, LoadOutcome::Missing),
            Err(err) => {
                warn!(error = %err, "discarding validation cache");
                (None, LoadOutcome::Discarded)
            }
        };
        debug!(path = %path.display(), ?outcome, "validation cache loaded");

        Self {
            path,
            cache,
            outcome,
            dirty: false,
            enabled: true,
        }
    }

    /// Creates a fresh aggregate with `fingerprint` if none is loaded.
    ///
    /// Idempotent: does nothing when an aggregate is already present.
    pub fn initialize_if_absent(&mut self, fingerprint: ConfigurationFingerprint) {
        if self.cache.is_none() {
            self.cache = Some(ValidationCache::new(fingerprint));
            self.dirty = true;
        }
    }

    /// Returns the cached entry for a block.
    pub fn get_block_entry(&self, name: &str) -> Option<&BlockCacheEntry> {
        self.cache.as_ref()?.blocks.get(name)
    }

    /// Replaces the entry for `entry.block_name`.
    ///
    /// Ignored (with a warning) if the store was never initialized.
    pub fn put_block_entry(&mut self, entry: BlockCacheEntry) {
        let Some(cache) = self.cache.as_mut() else {
            warn!(block = %entry.block_name, "cache not initialized, dropping block entry");
            return;
        };
        cache.blocks.insert(entry.block_name.clone(), entry);
        self.dirty = true;
    }

    /// Removes the entry for a block. Returns whether one was removed.
    pub fn remove_block_entry(&mut self, name: &str) -> bool {
        let removed = self
            .cache
            .as_mut()
            .is_some_and(|cache| cache.blocks.remove(name).is_some());
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Removes every entry whose block name is not in `current`, along with
    /// any stale per-block fingerprint. Returns the number of entries removed.
    pub fn prune_blocks(&mut self, current: &BTreeSet<String>) -> usize {
        let Some(cache) = self.cache.as_mut() else {
            return 0;
        };
        let before = cache.blocks.len();
        cache.blocks.retain(|name, _| current.contains(name));
        let removed = before - cache.blocks.len();

        let fp_before = cache.config_fingerprint.per_block.len();
        cache
            .config_fingerprint
            .per_block
            .retain(|name, _| current.contains(name));
        let fp_removed = fp_before - cache.config_fingerprint.per_block.len();

        if removed > 0 || fp_removed > 0 {
            debug!(removed, "pruned blocks no longer in configuration");
            self.dirty = true;
        }
        removed
    }

    /// Replaces the stored configuration fingerprint.
    pub fn update_fingerprint(&mut self, fingerprint: ConfigurationFingerprint) {
        if let Some(cache) = self.cache.as_mut() {
            cache.config_fingerprint = fingerprint;
            self.dirty = true;
        }
    }

    /// Writes the aggregate to disk if it is dirty. Returns whether a write
    /// happened.
    ///
    /// Stamps `updatedAt`, creates the cache directory on demand and
    /// replaces the previous file atomically. A failed write is logged and
    /// disables the store for the rest of the run; if the file on disk was
    /// discarded at load, it is deleted so no later run trusts it. Safe to
    /// call repeatedly; a no-op when disabled or clean.
    pub fn flush(&mut self) -> bool {
        if !self.enabled || !self.dirty {
            return false;
        }
        let Some(cache) = self.cache.as_mut() else {
            return false;
        };

        cache.updated_at = Utc::now();
        match write_cache(&self.path, cache) {
            Ok(()) => {
                self.dirty = false;
                debug!(path = %self.path.display(), blocks = cache.blocks.len(), "validation cache flushed");
                true
            }
            Err(err) => {
                warn!(error = %err, "validation cache disabled for this run");
                self.enabled = false;
                if self.outcome == LoadOutcome::Discarded {
                    if let Err(err) = remove_cache_file(&self.path) {
                        warn!(error = %err, "could not delete discarded validation cache");
                    }
                }
                false
            }
        }
    }

    /// Deletes the cache file and discards in-memory state.
    ///
    /// Returns whether a file was deleted. A missing file is not an error.
    pub fn clear(&mut self) -> bool {
        self.cache = None;
        self.dirty = false;
        match remove_cache_file(&self.path) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "could not delete validation cache");
                false
            }
        }
    }

    /// What the revalidation policy may trust.
    ///
    /// A cache discarded at load time stays unusable for the whole run, even
    /// after [`CacheStore::initialize_if_absent`].
    pub fn stored_state(&self) -> StoredState<'_> {
        match (&self.cache, self.outcome) {
            (_, LoadOutcome::Discarded) | (None, _) => StoredState::Unusable,
            (Some(cache), _) => StoredState::Available(cache),
        }
    }

    /// The in-memory aggregate, if any.
    pub fn cache(&self) -> Option<&ValidationCache> {
        self.cache.as_ref()
    }

    /// Full path of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How the initial state was obtained.
    pub fn load_outcome(&self) -> LoadOutcome {
        self.outcome
    }

    /// Whether there are unflushed mutations.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether flushes will reach disk.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Reads the cache file. `Ok(None)` means there is no file.
fn read_cache(path: &Path) -> Result<Option<ValidationCache>, CacheError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| CacheError::CacheParse {
            reason: e.to_string(),
        })?;
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if version != CACHE_SCHEMA_VERSION {
        return Err(CacheError::VersionMismatch {
            expected: CACHE_SCHEMA_VERSION.to_string(),
            actual: version.to_string(),
        });
    }

    let cache = serde_json::from_value(value).map_err(|e| CacheError::CacheParse {
        reason: e.to_string(),
    })?;
    Ok(Some(cache))
}

/// Serializes the whole document in memory, then swaps it in with a rename
/// so a crash mid-write leaves the previous file intact.
fn write_cache(path: &Path, cache: &ValidationCache) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| CacheError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let json = serde_json::to_vec_pretty(cache).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;

    let io_err = |e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn remove_cache_file(path: &Path) -> Result<bool, CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ContentHasher;
    use std::collections::BTreeMap;
    use tessera_common::ContentHash;

    fn settings() -> CacheSettings {
        CacheSettings::default()
    }

    fn entry(name: &str) -> BlockCacheEntry {
        BlockCacheEntry {
            block_name: name.to_string(),
            block_path: format!("blocks/{name}"),
            files: vec![],
            content_digest: ContentHasher::combine_digests(&[]),
            config_digest: ContentHash::from_bytes(name.as_bytes()),
            last_validated_at: Utc::now(),
            last_run_id: "run-1".to_string(),
            validator_results: BTreeMap::new(),
        }
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn load_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::load(dir.path(), &settings());
        assert!(store.cache().is_none());
        assert_eq!(store.load_outcome(), LoadOutcome::Missing);
        assert!(matches!(store.stored_state(), StoredState::Unusable));
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.put_block_entry(entry("orders"));
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(store.get_block_entry("orders").is_some());
        assert!(matches!(store.stored_state(), StoredState::Available(_)));
    }

    #[test]
    fn flush_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.put_block_entry(entry("orders"));
        assert!(store.flush());
        assert!(dir.path().join(".tessera").join(CACHE_FILE).exists());

        let reloaded = CacheStore::load(dir.path(), &settings());
        assert_eq!(reloaded.load_outcome(), LoadOutcome::Loaded);
        assert_eq!(reloaded.get_block_entry("orders"), store.get_block_entry("orders"));
    }

    #[test]
    fn second_flush_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(store.flush());
        let first = std::fs::read(store.path()).unwrap();
        assert!(!store.flush());
        assert_eq!(std::fs::read(store.path()).unwrap(), first);
        assert!(!store.is_dirty());
    }

    #[test]
    fn remove_marks_dirty_only_on_removal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.put_block_entry(entry("orders"));
        store.flush();

        assert!(!store.remove_block_entry("billing"));
        assert!(!store.is_dirty());
        assert!(store.remove_block_entry("orders"));
        assert!(store.is_dirty());
        assert!(store.get_block_entry("orders").is_none());
    }

    #[test]
    fn prune_removes_unlisted_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        let mut fp = ConfigurationFingerprint::default();
        fp.per_block.insert(
            "legacy".to_string(),
            crate::fingerprint::BlockFingerprint {
                definition_digest: ContentHash::from_bytes(b"d"),
                domain_rules_digest: None,
                inputs_outputs_digest: ContentHash::from_bytes(b"io"),
            },
        );
        store.initialize_if_absent(fp);
        store.put_block_entry(entry("orders"));
        store.put_block_entry(entry("legacy"));

        let removed = store.prune_blocks(&names(&["orders"]));
        assert_eq!(removed, 1);
        assert!(store.get_block_entry("legacy").is_none());
        assert!(store.get_block_entry("orders").is_some());
        assert!(store.cache().unwrap().config_fingerprint.per_block.is_empty());
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = CacheStore::cache_path(dir.path(), &settings());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not valid json {{{").unwrap();

        let mut store = CacheStore::load(dir.path(), &settings());
        assert_eq!(store.load_outcome(), LoadOutcome::Discarded);
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(matches!(store.stored_state(), StoredState::Unusable));
    }

    #[test]
    fn load_leaves_discarded_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = CacheStore::cache_path(dir.path(), &settings());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"version":"2"}"#).unwrap();

        let store = CacheStore::load(dir.path(), &settings());
        assert_eq!(store.load_outcome(), LoadOutcome::Discarded);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"version":"2"}"#);

        let again = CacheStore::load(dir.path(), &settings());
        assert_eq!(again.load_outcome(), LoadOutcome::Discarded);
    }

    #[test]
    fn flush_replaces_discarded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = CacheStore::cache_path(dir.path(), &settings());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not valid json {{{").unwrap();

        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(store.flush());

        let reloaded = CacheStore::load(dir.path(), &settings());
        assert_eq!(reloaded.load_outcome(), LoadOutcome::Loaded);
    }

    #[test]
    fn clear_removes_discarded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = CacheStore::cache_path(dir.path(), &settings());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not valid json {{{").unwrap();

        let mut store = CacheStore::load(dir.path(), &settings());
        assert!(store.clear());
        assert!(!path.exists());
    }

    #[test]
    fn wrong_version_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.flush();

        let path = store.path().to_path_buf();
        let text = std::fs::read_to_string(&path).unwrap();
        let edited = text.replace(
            &format!("\"version\": \"{CACHE_SCHEMA_VERSION}\""),
            "\"version\": \"0.0-handmade\"",
        );
        assert_ne!(text, edited);
        std::fs::write(&path, edited).unwrap();

        let store = CacheStore::load(dir.path(), &settings());
        assert_eq!(store.load_outcome(), LoadOutcome::Discarded);
        assert!(store.cache().is_none());
    }

    #[test]
    fn missing_required_fields_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = CacheStore::cache_path(dir.path(), &settings());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("{{\"version\": \"{CACHE_SCHEMA_VERSION}\"}}")).unwrap();

        let store = CacheStore::load(dir.path(), &settings());
        assert_eq!(store.load_outcome(), LoadOutcome::Discarded);
    }

    #[test]
    fn disabled_store_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let disabled = CacheSettings {
            enabled: false,
            ..CacheSettings::default()
        };
        let mut store = CacheStore::load(dir.path(), &disabled);
        assert_eq!(store.load_outcome(), LoadOutcome::Disabled);
        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.put_block_entry(entry("orders"));
        assert!(!store.flush());
        assert!(!dir.path().join(".tessera").exists());
        assert!(matches!(store.stored_state(), StoredState::Available(_)));
    }

    #[test]
    fn clear_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::load(dir.path(), &settings());
        assert!(!store.clear());

        store.initialize_if_absent(ConfigurationFingerprint::default());
        store.flush();
        assert!(store.clear());
        assert!(store.cache().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn custom_cache_dir_is_created_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let nested = CacheSettings {
            enabled: true,
            dir: "build/cache/tessera".to_string(),
        };
        let mut store = CacheStore::load(dir.path(), &nested);
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(store.flush());
        assert!(dir.path().join("build/cache/tessera").join(CACHE_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_directory_disables_store() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();
        // Root ignores directory permissions; nothing to observe then.
        if std::fs::write(locked.join("touch"), b"x").is_ok() {
            return;
        }

        let settings = CacheSettings {
            enabled: true,
            dir: "locked/cache".to_string(),
        };
        let mut store = CacheStore::load(dir.path(), &settings);
        store.initialize_if_absent(ConfigurationFingerprint::default());
        assert!(!store.flush());
        assert!(!store.is_enabled());
        assert!(!store.flush());
    }
}
