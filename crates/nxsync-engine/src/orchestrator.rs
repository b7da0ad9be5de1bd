//! Wires HashCache, FileScanner, TransferQueue, ProgressReporter, and
//! (optionally) ResumableUploader into a single backup or restore run.

use crate::hash_cache::HashCache;
use crate::progress::ProgressReporter;
use crate::queue::{TaskOutcome, TransferQueue};
use crate::resumable::ResumableUploader;
use crate::scanner::FileScanner;
use anyhow::{Context, Result};
use nxsync_core::error::NxsyncError;
use nxsync_core::types::RemoteFileEntry;
use nxsync_remote::RemoteOps;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct SyncOptions {
    pub source_dir: PathBuf,
    pub remote_target: String,
    pub cores: Option<usize>,
    pub force: bool,
    pub resume: bool,
    pub chunk_size_mib: u64,
    pub quiet: bool,
    pub verbose: bool,
    pub scan_concurrency: usize,
    pub include_hidden: bool,
    pub hash_cache_path: PathBuf,
    pub scanner_state_path: PathBuf,
    pub resume_state_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteOps>,
}

impl SyncOrchestrator {
    pub fn new(remote: Arc<dyn RemoteOps>) -> Self {
        Self { remote }
    }

    fn effective_concurrency(cores: Option<usize>) -> usize {
        cores.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (cpus * 2 / 3).max(1)
        })
    }

    pub async fn sync_once(&self, opts: SyncOptions) -> Result<RunSummary> {
        let availability = self.remote.check_availability().await;
        if !availability.installed {
            return Err(NxsyncError::Precondition(
                availability
                    .error
                    .unwrap_or_else(|| "remote CLI not installed".to_string()),
            )
            .into());
        }
        if !availability.authenticated {
            return Err(NxsyncError::Precondition(
                availability
                    .error
                    .unwrap_or_else(|| "remote CLI not authenticated".to_string()),
            )
            .into());
        }

        let mut scanner = FileScanner::new(
            opts.source_dir.clone(),
            opts.force,
            opts.scanner_state_path.clone(),
        )
        .with_scan_concurrency(opts.scan_concurrency)
        .with_include_hidden(opts.include_hidden);
        scanner.load_state();

        let mut hash_cache = HashCache::new(opts.hash_cache_path.clone());
        hash_cache.load();

        let scan = scanner
            .scan(&mut hash_cache)
            .context("scanning source directory")?;

        if scan.files_to_upload.is_empty() {
            tracing::info!("All files are up to date.");
            scanner.record_completion();
            scanner.save_state().context("saving scanner state")?;
            return Ok(RunSummary::default());
        }

        let concurrency = Self::effective_concurrency(opts.cores);
        let resumable = if opts.resume {
            Some(Arc::new(
                ResumableUploader::new(
                    self.remote.clone(),
                    opts.resume_state_dir.clone(),
                    opts.chunk_size_mib.saturating_mul(1024 * 1024),
                )
                .context("initializing resumable uploader")?,
            ))
        } else {
            None
        };

        // Pre-create every remote directory the batch touches, shallowest
        // first, before a single file transfer is enqueued: a sibling file
        // must never be uploaded ahead of the directory that holds it.
        for dir in remote_dirs_for_batch(&opts.remote_target, &scan.files_to_upload) {
            let outcome = self.remote.create_folder(&dir).await;
            if !outcome.success {
                tracing::warn!(path = %dir, message = %outcome.message, "create-folder failed");
            }
        }

        let total = scan.files_to_upload.len() as u64;
        let mut reporter = ProgressReporter::new(total);
        if !opts.quiet {
            reporter.start_updates(std::time::Duration::from_millis(250));
        }

        let remote = self.remote.clone();
        let target = opts.remote_target.clone();
        let reporter_handle = reporter.handle();
        let verbose = opts.verbose;

        let queue = TransferQueue::new(concurrency, move |file: nxsync_core::types::FileRecord| {
            let remote = remote.clone();
            let target = target.clone();
            let resumable = resumable.clone();
            let reporter = reporter_handle.clone();

            async move {
                let remote_path = join_remote(&target, &file.relative_path);

                let on_percent = |_pct: u8| {};
                let success = match &resumable {
                    Some(uploader) if ResumableUploader::should_use_resumable(file.size_bytes) => {
                        uploader
                            .upload_large_file(&file.absolute_path, &remote_path, &on_percent)
                            .await
                            .success
                    }
                    _ => {
                        remote
                            .upload_file_streamed(&file.absolute_path, &remote_path, &on_percent)
                            .await
                            .success
                    }
                };

                if success {
                    reporter.record_success();
                    if verbose {
                        tracing::info!(path = %file.relative_path, "uploaded");
                    }
                } else {
                    reporter.record_failure();
                    tracing::warn!(path = %file.relative_path, "upload failed");
                }

                TaskOutcome {
                    success,
                    identifier: file.relative_path.clone(),
                }
            }
        });

        queue.set_queue(scan.files_to_upload.clone());
        let outcomes = queue.start().await;

        let succeeded_paths: HashSet<&str> = outcomes
            .iter()
            .filter(|outcome| outcome.success)
            .map(|outcome| outcome.identifier.as_str())
            .collect();
        for file in &scan.files_to_upload {
            if succeeded_paths.contains(file.relative_path.as_str()) {
                scanner.update_file_state(&file.relative_path, &file.content_digest);
            }
        }

        reporter.stop_updates();
        scanner.record_completion();
        scanner.save_state().context("saving scanner state")?;
        if !opts.quiet {
            reporter.render_summary();
        }

        Ok(RunSummary {
            total,
            succeeded: reporter.succeeded(),
            failed: reporter.failed(),
        })
    }

    pub async fn restore_once(
        &self,
        remote_path: &str,
        destination: &Path,
        force: bool,
        cores: Option<usize>,
        quiet: bool,
    ) -> Result<RunSummary> {
        let availability = self.remote.check_availability().await;
        if !availability.installed || !availability.authenticated {
            return Err(NxsyncError::Precondition(
                availability
                    .error
                    .unwrap_or_else(|| "remote CLI unavailable".to_string()),
            )
            .into());
        }

        let entries = self
            .remote
            .list_files(remote_path)
            .await
            .map_err(NxsyncError::Remote)?;

        let mut to_download = Vec::new();
        for entry in entries {
            if entry.is_folder {
                continue;
            }
            let local_path = destination.join(relative_to(remote_path, &entry.path));
            if !force && is_file_up_to_date(&local_path, entry.size_bytes) {
                continue;
            }
            to_download.push(entry);
        }

        let total = to_download.len() as u64;
        if total == 0 {
            tracing::info!("destination already up to date");
            return Ok(RunSummary::default());
        }

        std::fs::create_dir_all(destination).context("creating restore destination")?;

        let concurrency = Self::effective_concurrency(cores);
        let mut reporter = ProgressReporter::new(total);
        if !quiet {
            reporter.start_updates(std::time::Duration::from_millis(250));
        }
        let reporter_handle = reporter.handle();

        let remote = self.remote.clone();
        let remote_prefix = remote_path.to_string();
        let destination = destination.to_path_buf();

        let queue = TransferQueue::new(concurrency, move |entry: RemoteFileEntry| {
            let remote = remote.clone();
            let destination = destination.clone();
            let remote_prefix = remote_prefix.clone();
            let reporter = reporter_handle.clone();

            async move {
                let local_path = destination.join(relative_to(&remote_prefix, &entry.path));
                if let Some(parent) = local_path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let on_percent = |_pct: u8| {};
                let outcome = remote
                    .download_file_streamed(&entry.path, &local_path, &on_percent)
                    .await;

                if outcome.success {
                    reporter.record_success();
                } else {
                    reporter.record_failure();
                    tracing::warn!(path = %entry.path, "download failed");
                }

                TaskOutcome {
                    success: outcome.success,
                    identifier: entry.path.clone(),
                }
            }
        });

        queue.set_queue(to_download);
        let _outcomes = queue.start().await;

        reporter.stop_updates();
        if !quiet {
            reporter.render_summary();
        }

        Ok(RunSummary {
            total,
            succeeded: reporter.succeeded(),
            failed: reporter.failed(),
        })
    }
}

/// Every unique remote directory implied by `files`' relative paths under
/// `target`, shallowest first, including `target` itself.
fn remote_dirs_for_batch(target: &str, files: &[nxsync_core::types::FileRecord]) -> Vec<String> {
    let root = target.trim_end_matches('/').to_string();
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();

    seen.insert(root.clone());
    dirs.push(root.clone());

    for file in files {
        let segments: Vec<&str> = file.relative_path.split('/').collect();
        let mut current = root.clone();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            current = format!("{current}/{segment}");
            if seen.insert(current.clone()) {
                dirs.push(current.clone());
            }
        }
    }

    dirs
}

fn join_remote(target: &str, relative: &str) -> String {
    format!("{}/{}", target.trim_end_matches('/'), relative)
}

fn relative_to(prefix: &str, path: &str) -> String {
    path.strip_prefix(prefix)
        .unwrap_or(path)
        .trim_start_matches('/')
        .to_string()
}

fn is_file_up_to_date(local_path: &Path, remote_size: u64) -> bool {
    std::fs::metadata(local_path)
        .map(|meta| meta.len() == remote_size)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxsync_remote::{Availability, TransferOutcome};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct StubRemote {
        uploads: AtomicU32,
        folders: StdMutex<Vec<String>>,
        fail_if_path_contains: Option<String>,
    }

    impl StubRemote {
        fn new() -> Self {
            Self {
                uploads: AtomicU32::new(0),
                folders: StdMutex::new(Vec::new()),
                fail_if_path_contains: None,
            }
        }

        fn failing_for(needle: &str) -> Self {
            Self {
                uploads: AtomicU32::new(0),
                folders: StdMutex::new(Vec::new()),
                fail_if_path_contains: Some(needle.to_string()),
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteOps for StubRemote {
        async fn check_availability(&self) -> Availability {
            Availability {
                installed: true,
                authenticated: true,
                version: Some("1.0.0".to_string()),
                error: None,
            }
        }

        async fn upload_file(&self, _local: &Path, _remote: &str) -> TransferOutcome {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            TransferOutcome {
                success: true,
                message: String::new(),
            }
        }

        async fn upload_file_streamed(
            &self,
            _local: &Path,
            remote: &str,
            _on_percent: &(dyn Fn(u8) + Send + Sync),
        ) -> TransferOutcome {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            let fails = self
                .fail_if_path_contains
                .as_deref()
                .is_some_and(|needle| remote.contains(needle));
            TransferOutcome {
                success: !fails,
                message: if fails { "stub upload failure".to_string() } else { String::new() },
            }
        }

        async fn download_file(&self, _remote: &str, _local: &Path) -> TransferOutcome {
            TransferOutcome {
                success: true,
                message: String::new(),
            }
        }

        async fn download_file_streamed(
            &self,
            _remote: &str,
            local: &Path,
            _on_percent: &(dyn Fn(u8) + Send + Sync),
        ) -> TransferOutcome {
            if let Some(parent) = local.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(local, b"restored");
            TransferOutcome {
                success: true,
                message: String::new(),
            }
        }

        async fn create_folder(&self, remote: &str) -> TransferOutcome {
            self.folders.lock().unwrap().push(remote.to_string());
            TransferOutcome {
                success: true,
                message: String::new(),
            }
        }

        async fn list_files(&self, _remote: &str) -> Result<Vec<RemoteFileEntry>, String> {
            Ok(vec![RemoteFileEntry {
                name: "a.txt".to_string(),
                path: "/backup/a.txt".to_string(),
                size_bytes: 8,
                is_folder: false,
            }])
        }

        async fn file_exists(&self, _remote: &str) -> bool {
            true
        }

        async fn delete_file(&self, _remote: &str) -> bool {
            true
        }
    }

    fn sync_options(dir: &std::path::Path, tmp: &std::path::Path, force: bool) -> SyncOptions {
        SyncOptions {
            source_dir: dir.to_path_buf(),
            remote_target: "/backup".to_string(),
            cores: Some(2),
            force,
            resume: false,
            chunk_size_mib: 50,
            quiet: true,
            verbose: false,
            scan_concurrency: 1,
            include_hidden: false,
            hash_cache_path: tmp.join("hash-cache.json"),
            scanner_state_path: tmp.join("scanner-state.json"),
            resume_state_dir: tmp.join("resume"),
        }
    }

    #[tokio::test]
    async fn first_run_uploads_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let remote = Arc::new(StubRemote::new());
        let orchestrator = SyncOrchestrator::new(remote.clone());
        let summary = orchestrator
            .sync_once(sync_options(&source, tmp.path(), false))
            .await
            .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn second_run_with_unchanged_files_uploads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let remote = Arc::new(StubRemote::new());
        let orchestrator = SyncOrchestrator::new(remote.clone());
        orchestrator
            .sync_once(sync_options(&source, tmp.path(), false))
            .await
            .unwrap();

        let second = orchestrator
            .sync_once(sync_options(&source, tmp.path(), false))
            .await
            .unwrap();

        assert_eq!(second.total, 0);
        assert_eq!(remote.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_flag_reuploads_unchanged_files() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"hello").unwrap();

        let remote = Arc::new(StubRemote::new());
        let orchestrator = SyncOrchestrator::new(remote.clone());
        orchestrator
            .sync_once(sync_options(&source, tmp.path(), false))
            .await
            .unwrap();

        let forced = orchestrator
            .sync_once(sync_options(&source, tmp.path(), true))
            .await
            .unwrap();

        assert_eq!(forced.total, 1);
        assert_eq!(remote.uploads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_downloads_into_empty_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let destination = tmp.path().join("restored");

        let remote = Arc::new(StubRemote::new());
        let orchestrator = SyncOrchestrator::new(remote);
        let summary = orchestrator
            .restore_once("/backup", &destination, false, Some(1), true)
            .await
            .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(destination.join("a.txt").exists());
    }

    #[test]
    fn join_remote_trims_trailing_slash() {
        assert_eq!(join_remote("/backup/", "a.txt"), "/backup/a.txt");
    }

    #[test]
    fn remote_dirs_for_batch_creates_parents_before_children() {
        let files = vec![
            FileRecordForTest::new("sub/deep/a.txt"),
            FileRecordForTest::new("sub/b.txt"),
            FileRecordForTest::new("c.txt"),
        ];
        let dirs = remote_dirs_for_batch("/backup", &files.into_iter().map(Into::into).collect::<Vec<_>>());

        assert_eq!(
            dirs,
            vec![
                "/backup".to_string(),
                "/backup/sub".to_string(),
                "/backup/sub/deep".to_string(),
            ]
        );
    }

    struct FileRecordForTest {
        relative_path: String,
    }

    impl FileRecordForTest {
        fn new(relative_path: &str) -> Self {
            Self {
                relative_path: relative_path.to_string(),
            }
        }
    }

    impl From<FileRecordForTest> for nxsync_core::types::FileRecord {
        fn from(value: FileRecordForTest) -> Self {
            nxsync_core::types::FileRecord {
                relative_path: value.relative_path,
                absolute_path: PathBuf::new(),
                size_bytes: 0,
                content_digest: String::new(),
                change_state: nxsync_core::types::ChangeState::Changed,
            }
        }
    }

    #[tokio::test]
    async fn directories_are_created_before_queue_starts_uploading() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("sub/a.txt"), b"hello").unwrap();

        let remote = Arc::new(StubRemote::new());
        let orchestrator = SyncOrchestrator::new(remote.clone());
        orchestrator
            .sync_once(sync_options(&source, tmp.path(), false))
            .await
            .unwrap();

        let folders = remote.folders.lock().unwrap();
        assert!(folders.contains(&"/backup".to_string()));
        assert!(folders.contains(&"/backup/sub".to_string()));
    }

    #[tokio::test]
    async fn only_succeeded_files_update_scanner_state() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("ok.txt"), b"hello").unwrap();
        std::fs::write(source.join("bad.txt"), b"world").unwrap();

        let opts = sync_options(&source, tmp.path(), false);
        let scanner_state_path = opts.scanner_state_path.clone();

        let remote = Arc::new(StubRemote::failing_for("bad.txt"));
        let orchestrator = SyncOrchestrator::new(remote.clone());
        let summary = orchestrator.sync_once(opts).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let persisted = std::fs::read_to_string(&scanner_state_path).unwrap();
        let state: nxsync_core::types::ScannerState = serde_json::from_str(&persisted).unwrap();
        assert!(state.files.contains_key("ok.txt"));
        assert!(!state.files.contains_key("bad.txt"));
    }
}
