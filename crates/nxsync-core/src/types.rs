use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Whether a discovered file's content has been observed to differ from the
/// last run's hash-cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeState {
    Unknown,
    Changed,
    Unchanged,
}

/// A file discovered by the scanner, relative to the source root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub content_digest: String,
    pub change_state: ChangeState,
}

/// Persisted `files` + `last_run` document owned by the scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerState {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub last_run: Option<String>,
}

/// One entry in the persistent per-file resumable-upload state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadState {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    #[serde(default)]
    pub uploaded_chunks: BTreeSet<u64>,
    pub file_checksum: String,
    pub timestamp: String,
}

/// A unit of work handed to the transfer queue.
#[derive(Debug, Clone)]
pub enum TransferTask {
    Upload(FileRecord, String),
    Download(RemoteFileEntry, PathBuf),
}

/// An entry returned by the remote CLI's list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub is_folder: bool,
}

/// Aggregate outcome counters for one run.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ProgressCounters {
    pub fn is_complete(&self) -> bool {
        self.succeeded + self.failed == self.total
    }
}
