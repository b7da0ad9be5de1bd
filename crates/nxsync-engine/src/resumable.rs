//! Resumable large-file uploads: chunk-accounted progress, exponential
//! backoff retry, and checksum-verified resume across process restarts.

use anyhow::{Context, Result};
use nxsync_core::types::UploadState;
use nxsync_remote::RemoteOps;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Files at or below this size use the plain streamed upload path.
pub const RESUMABLE_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// `min(1000 * 2^attempt, 10000)` milliseconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(32));
    Duration::from_millis(millis.min(10_000))
}

#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    pub success: bool,
    pub bytes_uploaded: u64,
    pub error: Option<String>,
}

pub struct ResumableUploader {
    remote: Arc<dyn RemoteOps>,
    state_dir: PathBuf,
    chunk_size: u64,
}

impl ResumableUploader {
    pub fn new(remote: Arc<dyn RemoteOps>, state_dir: PathBuf, chunk_size: u64) -> Result<Self> {
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating resume state dir: {}", state_dir.display()))?;
        Ok(Self {
            remote,
            state_dir,
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE_BYTES
            } else {
                chunk_size
            },
        })
    }

    pub fn should_use_resumable(size: u64) -> bool {
        size > RESUMABLE_THRESHOLD_BYTES
    }

    fn state_path(&self, local_path: &Path) -> PathBuf {
        let basename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let key_digest = nxsync_hash::digest_bytes(local_path.to_string_lossy().as_bytes());
        self.state_dir
            .join(format!("{basename}.{key_digest}.upload-state.json"))
    }

    fn load_state(&self, local_path: &Path) -> Option<UploadState> {
        let content = std::fs::read_to_string(self.state_path(local_path)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn persist_state(&self, state: &UploadState) -> Result<()> {
        let path = self.state_path(&state.local_path);
        let json = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn clear_state(&self, local_path: &Path) {
        let path = self.state_path(local_path);
        let _ = std::fs::remove_file(path);
    }

    pub fn get_progress(&self, local_path: &Path) -> u8 {
        match self.load_state(local_path) {
            Some(state) if state.total_chunks > 0 => {
                ((state.uploaded_chunks.len() as f64 / state.total_chunks as f64) * 100.0) as u8
            }
            _ => 0,
        }
    }

    pub fn can_resume(&self, local_path: &Path) -> bool {
        match self.load_state(local_path) {
            Some(state) => (state.uploaded_chunks.len() as u64) < state.total_chunks,
            None => false,
        }
    }

    /// Upload `local_path` to `remote_path`, delegating to the plain
    /// streamed path for files at or below the resumable threshold.
    pub async fn upload_large_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> UploadOutcome {
        let size = match std::fs::metadata(local_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return UploadOutcome {
                    success: false,
                    bytes_uploaded: 0,
                    error: Some(format!("stat failed: {e}")),
                }
            }
        };

        if !Self::should_use_resumable(size) {
            let outcome = self
                .remote
                .upload_file_streamed(local_path, remote_path, on_percent)
                .await;
            return UploadOutcome {
                success: outcome.success,
                bytes_uploaded: if outcome.success { size } else { 0 },
                error: if outcome.success {
                    None
                } else {
                    Some(outcome.message)
                },
            };
        }

        let checksum = match nxsync_hash::checksum_file(local_path) {
            Ok(c) => c,
            Err(e) => {
                return UploadOutcome {
                    success: false,
                    bytes_uploaded: 0,
                    error: Some(format!("checksum failed: {e}")),
                }
            }
        };

        let total_chunks = size.div_ceil(self.chunk_size).max(1);

        let mut state = match self.load_state(local_path) {
            Some(existing) if existing.file_checksum == checksum => existing,
            Some(_) => {
                // Stale state for a since-modified file: discard and start fresh.
                self.clear_state(local_path);
                UploadState {
                    local_path: local_path.to_path_buf(),
                    remote_path: remote_path.to_string(),
                    chunk_size: self.chunk_size,
                    total_chunks,
                    uploaded_chunks: BTreeSet::new(),
                    file_checksum: checksum.clone(),
                    timestamp: String::new(),
                }
            }
            None => UploadState {
                local_path: local_path.to_path_buf(),
                remote_path: remote_path.to_string(),
                chunk_size: self.chunk_size,
                total_chunks,
                uploaded_chunks: BTreeSet::new(),
                file_checksum: checksum.clone(),
                timestamp: String::new(),
            },
        };

        let mut attempt = 0u32;
        loop {
            let base = state.uploaded_chunks.len() as f64 / total_chunks as f64 * 100.0;
            let composed = move |chunk_progress: u8| {
                let current = chunk_progress as f64 / total_chunks as f64;
                let pct = (base + current).min(100.0).round() as u8;
                on_percent(pct);
            };

            let outcome = self
                .remote
                .upload_file_streamed(local_path, remote_path, &composed)
                .await;

            if outcome.success {
                self.clear_state(local_path);
                return UploadOutcome {
                    success: true,
                    bytes_uploaded: size,
                    error: None,
                };
            }

            attempt += 1;
            if attempt >= MAX_RETRY_ATTEMPTS {
                state.timestamp = chrono::Utc::now().to_rfc3339();
                if let Err(e) = self.persist_state(&state) {
                    tracing::warn!(error = %e, "failed to persist resumable upload state");
                }
                let fraction = state.uploaded_chunks.len() as f64 / total_chunks as f64;
                return UploadOutcome {
                    success: false,
                    bytes_uploaded: (fraction * size as f64) as u64,
                    error: Some(outcome.message),
                };
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
}
