//! Persistent content-digest cache — tracks the MD5 of each file we've seen
//! so repeat runs can skip uploading unchanged content.
//!
//! Backed by a single flat JSON map. Loaded once at startup, updated as
//! files are observed, and flushed atomically (write-then-rename).

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct HashCache {
    cache_path: PathBuf,
    entries: HashMap<String, String>,
    dirty: bool,
}

impl HashCache {
    /// Construct a cache bound to `cache_path` without touching disk yet.
    pub fn new(cache_path: PathBuf) -> Self {
        Self {
            cache_path,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Load the cache file if it exists. Returns `true` if an existing
    /// cache was loaded, `false` if it was missing or unparseable — in
    /// either case the in-memory cache starts empty and the caller should
    /// treat every file as unseen.
    pub fn load(&mut self) -> bool {
        let content = match std::fs::read_to_string(&self.cache_path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        match serde_json::from_str(&content) {
            Ok(entries) => {
                self.entries = entries;
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.cache_path.display(), error = %e, "hash cache corrupt, starting empty");
                false
            }
        }
    }

    /// Persist the current map to disk, atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating hash cache dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries).context("serializing hash cache")?;
        let tmp_path = self.cache_path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing hash cache temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.cache_path)
            .with_context(|| format!("renaming hash cache: {}", self.cache_path.display()))?;
        Ok(())
    }

    /// Compute the file's current MD5 and compare against the cached value.
    ///
    /// Returns `true` (treat as changed) for a new path, a digest mismatch,
    /// or any I/O error reading the file — the cache fails open toward
    /// re-upload rather than silently skipping a file it couldn't verify.
    pub fn has_changed(&mut self, path: &Path) -> bool {
        let key = normalize_key(path);
        let digest = match nxsync_hash::digest_file(path) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to hash file, treating as changed");
                return true;
            }
        };

        let changed = match self.entries.get(&key) {
            Some(existing) => existing != &digest,
            None => true,
        };
        if changed {
            self.entries.insert(key, digest);
            self.dirty = true;
            if let Err(e) = self.save() {
                tracing::warn!(error = %e, "failed to persist hash cache");
            }
        }
        changed
    }

    /// Record a digest for `path` without touching disk.
    pub fn update_hash(&mut self, path: &Path, digest: String) {
        let key = normalize_key(path);
        self.entries.insert(key, digest);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }
}

fn normalize_key(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().replace('\\', "/")
}
