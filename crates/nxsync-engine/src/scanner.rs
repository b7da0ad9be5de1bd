//! Walks the source tree, hashes file content, and reports which files need
//! uploading by consulting the hash cache.

use crate::hash_cache::HashCache;
use anyhow::{Context, Result};
use nxsync_core::types::{ChangeState, FileRecord, ScannerState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct ScanResult {
    pub all_files: Vec<FileRecord>,
    pub files_to_upload: Vec<FileRecord>,
    pub total_bytes: u64,
    pub total_mb: f64,
}

pub struct FileScanner {
    source_dir: PathBuf,
    force_upload: bool,
    state_path: PathBuf,
    state: ScannerState,
    scan_concurrency: usize,
    include_hidden: bool,
}

impl FileScanner {
    pub fn new(source_dir: PathBuf, force_upload: bool, state_path: PathBuf) -> Self {
        Self {
            source_dir,
            force_upload,
            state_path,
            state: ScannerState::default(),
            scan_concurrency: 1,
            include_hidden: false,
        }
    }

    /// Bounds the worker pool `scan()` uses to stat and hash files.
    pub fn with_scan_concurrency(mut self, scan_concurrency: usize) -> Self {
        self.scan_concurrency = scan_concurrency.max(1);
        self
    }

    pub fn with_include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    pub fn load_state(&mut self) {
        if let Ok(content) = std::fs::read_to_string(&self.state_path) {
            if let Ok(state) = serde_json::from_str(&content) {
                self.state = state;
                return;
            }
        }
        self.state = ScannerState::default();
    }

    pub fn scan(&self, hash_cache: &mut HashCache) -> Result<ScanResult> {
        let source_dir = std::fs::canonicalize(&self.source_dir)
            .with_context(|| format!("resolving source dir: {}", self.source_dir.display()))?;

        let mut paths = Vec::new();
        walk(
            &source_dir,
            &source_dir,
            &self.state_path,
            self.include_hidden,
            &mut paths,
        )?;
        paths.sort();

        // Stat + hash every file across a bounded worker pool first — this
        // is the CPU/IO-bound part `scan_concurrency` governs. HashCache's
        // own change detection stays single-threaded afterward since
        // `has_changed` takes `&mut self`.
        let digests = self.hash_paths(&paths);

        let mut all_files = Vec::with_capacity(paths.len());
        let mut files_to_upload = Vec::new();
        let mut total_bytes = 0u64;

        for ((relative_path, absolute_path), stat) in paths.into_iter().zip(digests) {
            let Some((size_bytes, content_digest)) = stat else {
                continue;
            };
            total_bytes += size_bytes;

            let changed = if self.force_upload {
                true
            } else {
                hash_cache.has_changed(&absolute_path)
            };

            let record = FileRecord {
                relative_path,
                absolute_path,
                size_bytes,
                content_digest,
                change_state: if changed {
                    ChangeState::Changed
                } else {
                    ChangeState::Unchanged
                },
            };

            if changed {
                files_to_upload.push(record.clone());
            }
            all_files.push(record);
        }

        Ok(ScanResult {
            all_files,
            files_to_upload,
            total_bytes,
            total_mb: total_bytes as f64 / (1024.0 * 1024.0),
        })
    }

    /// Stats and hashes every path in `paths` using up to `scan_concurrency`
    /// OS threads, returning `(size, digest)` per entry in input order (or
    /// `None` for a path that couldn't be read or hashed).
    fn hash_paths(&self, paths: &[(String, PathBuf)]) -> Vec<Option<(u64, String)>> {
        if paths.is_empty() {
            return Vec::new();
        }

        let results = Mutex::new(vec![None; paths.len()]);
        let next = AtomicUsize::new(0);
        let workers = self.scan_concurrency.min(paths.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    if idx >= paths.len() {
                        return;
                    }
                    let (_, absolute_path) = &paths[idx];
                    let outcome = stat_and_digest(absolute_path);
                    results.lock().unwrap()[idx] = outcome;
                });
            }
        });

        results.into_inner().unwrap()
    }

    pub fn update_file_state(&mut self, relative_path: &str, digest: &str) {
        self.state
            .files
            .insert(relative_path.to_string(), digest.to_string());
    }

    pub fn record_completion(&mut self) {
        self.state.last_run = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn save_state(&self) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating scanner state dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.state).context("serializing scanner state")?;
        let tmp = self.state_path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("writing scanner state temp: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.state_path)
            .with_context(|| format!("renaming scanner state: {}", self.state_path.display()))?;
        Ok(())
    }
}

fn stat_and_digest(absolute_path: &Path) -> Option<(u64, String)> {
    let meta = match std::fs::metadata(absolute_path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(path = %absolute_path.display(), error = %e, "skipping unreadable file");
            return None;
        }
    };

    let content_digest = match nxsync_hash::digest_file(absolute_path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(path = %absolute_path.display(), error = %e, "skipping file that could not be hashed");
            return None;
        }
    };

    Some((meta.len(), content_digest))
}

fn walk(
    root: &Path,
    dir: &Path,
    state_path: &Path,
    include_hidden: bool,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry.with_context(|| format!("reading directory entry in {}", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if !include_hidden && name.starts_with('.') {
            continue;
        }
        if path == state_path {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, state_path, include_hidden, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((relative, path));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let state_path = dir.path().join("state.json");
        (dir, source, state_path)
    }

    #[test]
    fn scan_skips_dotfiles() {
        let (_dir, source, state_path) = setup();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();
        std::fs::write(source.join(".hidden"), b"secret").unwrap();

        let scanner = FileScanner::new(source, false, state_path.clone());
        let mut cache = HashCache::new(state_path.with_file_name("cache.json"));
        let result = scanner.scan(&mut cache).unwrap();

        assert_eq!(result.all_files.len(), 1);
        assert_eq!(result.all_files[0].relative_path, "a.txt");
    }

    #[test]
    fn first_scan_marks_everything_changed() {
        let (_dir, source, state_path) = setup();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("sub/b.bin"), b"world!").unwrap();

        let scanner = FileScanner::new(source, false, state_path.clone());
        let mut cache = HashCache::new(state_path.with_file_name("cache.json"));
        let result = scanner.scan(&mut cache).unwrap();

        assert_eq!(result.files_to_upload.len(), 2);
        assert_eq!(result.total_bytes, 11);
    }

    #[test]
    fn second_scan_of_unchanged_tree_uploads_nothing() {
        let (_dir, source, state_path) = setup();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let scanner = FileScanner::new(source.clone(), false, state_path.clone());
        let cache_path = state_path.with_file_name("cache.json");
        let mut cache = HashCache::new(cache_path.clone());
        scanner.scan(&mut cache).unwrap();

        let mut cache2 = HashCache::new(cache_path);
        cache2.load();
        let result2 = scanner.scan(&mut cache2).unwrap();
        assert!(result2.files_to_upload.is_empty());
    }

    #[test]
    fn force_upload_ignores_cache() {
        let (_dir, source, state_path) = setup();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let cache_path = state_path.with_file_name("cache.json");
        let mut cache = HashCache::new(cache_path.clone());
        let scanner = FileScanner::new(source.clone(), false, state_path.clone());
        scanner.scan(&mut cache).unwrap();

        let mut cache2 = HashCache::new(cache_path);
        cache2.load();
        let forced = FileScanner::new(source, true, state_path);
        let result = forced.scan(&mut cache2).unwrap();
        assert_eq!(result.files_to_upload.len(), 1);
    }

    #[test]
    fn scan_concurrency_above_one_still_hashes_every_file() {
        let (_dir, source, state_path) = setup();
        for i in 0..10 {
            std::fs::write(source.join(format!("f{i}.txt")), format!("content-{i}")).unwrap();
        }

        let scanner = FileScanner::new(source, false, state_path.clone())
            .with_scan_concurrency(4);
        let mut cache = HashCache::new(state_path.with_file_name("cache.json"));
        let result = scanner.scan(&mut cache).unwrap();

        assert_eq!(result.all_files.len(), 10);
        assert_eq!(result.files_to_upload.len(), 10);
        assert!(result.all_files.iter().all(|f| !f.content_digest.is_empty()));
    }
}
