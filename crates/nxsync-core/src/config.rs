use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level agent configuration (loaded from nxsync.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NxsyncConfig {
    pub concurrency: Option<usize>,
    pub resume: ResumeConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Enable the resumable uploader for files above the resumable threshold
    pub enabled: bool,
    /// Chunk size in MiB used for resumable-upload progress accounting
    pub chunk_size_mib: u64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size_mib: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where the hash cache JSON document lives (default: OS temp dir)
    pub hash_cache_path: Option<PathBuf>,
    /// Where the scanner state JSON document lives (default: OS temp dir)
    pub state_dir: Option<PathBuf>,
    /// Where per-file resumable-upload state documents live
    pub resume_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Name or path of the remote CLI binary (default: "internxt")
    pub binary: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            binary: "internxt".into(),
        }
    }
}
