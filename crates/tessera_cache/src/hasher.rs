//! Content hashing for files, blocks and configuration slices.
//!
//! File digests are combined in relative-path order so a block's content
//! digest does not depend on filesystem iteration order. Configuration
//! slices are canonicalized (sorted keys, no whitespace) before digesting so
//! that reformatting the configuration never counts as a change.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tessera_common::ContentHash;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::types::FileDigest;

/// Result of scanning one block directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScan {
    /// Digests of every readable file, sorted by relative path.
    pub files: Vec<FileDigest>,
    /// Combined digest of `files`.
    pub content_digest: ContentHash,
    /// Files that exist but could not be read, sorted. Each one counts as changed.
    pub unreadable: Vec<String>,
}

impl BlockScan {
    /// Builds a scan from file digests in any order.
    pub fn from_files(mut files: Vec<FileDigest>) -> Self {
        let content_digest = ContentHasher::combine_files(&mut files);
        Self {
            files,
            content_digest,
            unreadable: Vec::new(),
        }
    }
}

/// Utility for computing file, block and configuration digests.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes one file, recording its path relative to `base`.
    pub fn hash_file(base: &Path, path: &Path) -> Result<FileDigest, CacheError> {
        let io_err = |e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let content = std::fs::read(path).map_err(io_err)?;
        let metadata = std::fs::metadata(path).map_err(io_err)?;
        let modified_at_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(FileDigest {
            relative_path: relative_path(base, path),
            digest: ContentHash::from_bytes(&content),
            size_bytes: content.len() as u64,
            modified_at_ms,
        })
    }

    /// Combines digests that are already in relative-path order.
    ///
    /// The empty sequence has a well-defined digest, distinct from
    /// [`ContentHash::UNAVAILABLE`].
    pub fn combine_digests(digests: &[ContentHash]) -> ContentHash {
        let mut buf = Vec::with_capacity(digests.len() * 32);
        for digest in digests {
            buf.extend_from_slice(digest.as_bytes());
        }
        ContentHash::from_bytes(&buf)
    }

    /// Sorts `files` by relative path and returns their combined digest.
    pub fn combine_files(files: &mut [FileDigest]) -> ContentHash {
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let digests: Vec<ContentHash> = files.iter().map(|f| f.digest).collect();
        Self::combine_digests(&digests)
    }

    /// Digests the canonical JSON form of a configuration slice.
    pub fn hash_config_slice<T: Serialize + ?Sized>(
        name: &str,
        slice: &T,
    ) -> Result<ContentHash, CacheError> {
        let slice_err = |e: serde_json::Error| CacheError::ConfigSlice {
            slice: name.to_string(),
            reason: e.to_string(),
        };
        // `serde_json::Value` objects are sorted maps, so going through a
        // value fixes key order before the compact encoding.
        let value = serde_json::to_value(slice).map_err(slice_err)?;
        let canonical = serde_json::to_vec(&value).map_err(slice_err)?;
        Ok(ContentHash::from_bytes(&canonical))
    }

    /// Scans every regular file under `block_dir`.
    ///
    /// Directories listed in `skip` are not descended into. Unreadable
    /// entries, and symlinks that do not resolve to a regular file, are
    /// recorded in [`BlockScan::unreadable`] rather than failing the whole
    /// block. A missing block directory scans as empty.
    pub fn scan_block(block_dir: &Path, skip: &[PathBuf]) -> BlockScan {
        let mut files = Vec::new();
        let mut unreadable = Vec::new();

        if !block_dir.is_dir() {
            warn!(
                block_dir = %block_dir.display(),
                "block directory does not exist, treating it as empty"
            );
            return BlockScan::from_files(files);
        }

        let walker = WalkDir::new(block_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !skip.iter().any(|s| e.path() == s.as_path()));

        for entry in walker {
            match entry {
                Ok(entry) if entry.depth() > 0 && entry.path_is_symlink() => {
                    // Links are not descended into; one that resolves to a
                    // regular file is digested through to its target.
                    if entry.path().is_file() {
                        Self::push_file(block_dir, entry.path(), &mut files, &mut unreadable);
                    } else {
                        warn!(
                            path = %entry.path().display(),
                            "symlink does not resolve to a regular file, treating it as changed"
                        );
                        unreadable.push(relative_path(block_dir, entry.path()));
                    }
                }
                Ok(entry) if entry.file_type().is_file() => {
                    Self::push_file(block_dir, entry.path(), &mut files, &mut unreadable);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "cannot traverse block directory entry");
                    if let Some(path) = err.path() {
                        unreadable.push(relative_path(block_dir, path));
                    }
                }
            }
        }

        unreadable.sort();
        unreadable.dedup();
        let mut scan = BlockScan::from_files(files);
        scan.unreadable = unreadable;
        scan
    }

    fn push_file(
        block_dir: &Path,
        path: &Path,
        files: &mut Vec<FileDigest>,
        unreadable: &mut Vec<String>,
    ) {
        match Self::hash_file(block_dir, path) {
            Ok(digest) => files.push(digest),
            Err(err) => {
                warn!(error = %err, "unreadable file, treating it as changed");
                unreadable.push(relative_path(block_dir, path));
            }
        }
    }
}

/// Renders `path` relative to `base` with `/` separators.
fn relative_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
