//! Subprocess wrapper around the external remote-CLI backup tool.
//!
//! Every call shells out to the configured binary (`internxt` by default)
//! through an argument vector — never a shell string — so embedded quotes
//! or spaces in paths cannot be misinterpreted.

use async_trait::async_trait;
use nxsync_core::types::RemoteFileEntry;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Result of probing the remote CLI for installation and authentication.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    pub installed: bool,
    pub authenticated: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Result of a single upload/download/create-folder/delete invocation.
#[derive(Debug, Clone, Default)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
}

/// The capability set a RemoteClient exposes. Extracted as a trait so tests
/// (and the resumable uploader / transfer queue) can depend on a stub
/// instead of spawning the real external binary.
#[async_trait]
pub trait RemoteOps: Send + Sync {
    async fn check_availability(&self) -> Availability;
    async fn upload_file(&self, local: &Path, remote: &str) -> TransferOutcome;
    async fn upload_file_streamed(
        &self,
        local: &Path,
        remote: &str,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> TransferOutcome;
    async fn download_file(&self, remote: &str, local: &Path) -> TransferOutcome;
    async fn download_file_streamed(
        &self,
        remote: &str,
        local: &Path,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> TransferOutcome;
    async fn create_folder(&self, remote: &str) -> TransferOutcome;
    async fn list_files(&self, remote: &str) -> Result<Vec<RemoteFileEntry>, String>;
    async fn file_exists(&self, remote: &str) -> bool;
    async fn delete_file(&self, remote: &str) -> bool;
}

/// Invokes the configured binary for every operation.
pub struct RemoteClient {
    binary: String,
}

impl RemoteClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> (bool, String) {
        let output = Command::new(&self.binary).args(args).output().await;
        match output {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                (output.status.success(), combined)
            }
            Err(e) => (false, format!("failed to spawn {}: {e}", self.binary)),
        }
    }

    fn looks_like_failure(output: &str) -> bool {
        let lower = output.to_lowercase();
        lower.contains("error") || lower.contains("failed")
    }

    async fn run_streamed(
        &self,
        args: &[&str],
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> (bool, String) {
        let mut child = match Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return (false, format!("failed to spawn {}: {e}", self.binary)),
        };

        let mut stdout = child.stdout.take();
        let mut combined = String::new();
        if let Some(mut out) = stdout.take() {
            let mut buf = [0u8; 4096];
            loop {
                match out.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        for pct in extract_percentages(&chunk) {
                            on_percent(pct);
                        }
                        combined.push_str(&chunk);
                    }
                    Err(_) => break,
                }
            }
        }

        let status = child.wait().await;
        match status {
            Ok(status) => (status.success(), combined),
            Err(e) => (false, format!("wait failed: {e}")),
        }
    }

    fn parse_list_output(output: &str) -> Vec<RemoteFileEntry> {
        if let Ok(entries) = serde_json::from_str::<Vec<RemoteFileEntry>>(output) {
            return entries;
        }
        if let Ok(entry) = serde_json::from_str::<RemoteFileEntry>(output) {
            return vec![entry];
        }

        output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                if let Some(name) = line.strip_suffix('/') {
                    return Some(RemoteFileEntry {
                        name: name.to_string(),
                        path: line.to_string(),
                        size_bytes: 0,
                        is_folder: true,
                    });
                }
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let size: u64 = parts.next()?.parse().ok()?;
                Some(RemoteFileEntry {
                    name: name.to_string(),
                    path: name.to_string(),
                    size_bytes: size,
                    is_folder: false,
                })
            })
            .collect()
    }
}

fn extract_percentages(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'%' {
                if let Ok(n) = text[start..i].parse::<u32>() {
                    out.push(n.min(100) as u8);
                }
                i += 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[async_trait]
impl RemoteOps for RemoteClient {
    async fn check_availability(&self) -> Availability {
        let (ok, output) = self.run(&["--version"]).await;
        if !ok || output.trim().is_empty() {
            return Availability {
                installed: false,
                authenticated: false,
                version: None,
                error: Some(output),
            };
        }
        let version = output.trim().to_string();

        let (list_ok, list_output) = self.run(&["list-files", "/"]).await;
        if !list_ok || Self::looks_like_failure(&list_output) {
            return Availability {
                installed: true,
                authenticated: false,
                version: Some(version),
                error: Some(list_output),
            };
        }

        Availability {
            installed: true,
            authenticated: true,
            version: Some(version),
            error: None,
        }
    }

    async fn upload_file(&self, local: &Path, remote: &str) -> TransferOutcome {
        let local = local.to_string_lossy().to_string();
        let (ok, output) = self.run(&["upload-file", &local, remote]).await;
        TransferOutcome {
            success: ok && !Self::looks_like_failure(&output),
            message: output,
        }
    }

    async fn upload_file_streamed(
        &self,
        local: &Path,
        remote: &str,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> TransferOutcome {
        let local = local.to_string_lossy().to_string();
        let (ok, output) = self
            .run_streamed(&["upload-file", &local, remote], on_percent)
            .await;
        TransferOutcome {
            success: ok && !Self::looks_like_failure(&output),
            message: output,
        }
    }

    async fn download_file(&self, remote: &str, local: &Path) -> TransferOutcome {
        let local = local.to_string_lossy().to_string();
        let (ok, output) = self.run(&["download-file", remote, &local]).await;
        TransferOutcome {
            success: ok && !Self::looks_like_failure(&output),
            message: output,
        }
    }

    async fn download_file_streamed(
        &self,
        remote: &str,
        local: &Path,
        on_percent: &(dyn Fn(u8) + Send + Sync),
    ) -> TransferOutcome {
        let local = local.to_string_lossy().to_string();
        let (ok, output) = self
            .run_streamed(&["download-file", remote, &local], on_percent)
            .await;
        TransferOutcome {
            success: ok && !Self::looks_like_failure(&output),
            message: output,
        }
    }

    async fn create_folder(&self, remote: &str) -> TransferOutcome {
        let (ok, output) = self.run(&["create-folder", remote]).await;
        let already_exists = output.to_lowercase().contains("already exists");
        TransferOutcome {
            success: (ok && !Self::looks_like_failure(&output)) || already_exists,
            message: output,
        }
    }

    async fn list_files(&self, remote: &str) -> Result<Vec<RemoteFileEntry>, String> {
        let (ok, output) = self.run(&["list-files", remote, "--format=json"]).await;
        if !ok {
            return Err(output);
        }
        Ok(Self::parse_list_output(&output))
    }

    async fn file_exists(&self, remote: &str) -> bool {
        matches!(self.list_files(remote).await, Ok(entries) if !entries.is_empty())
    }

    async fn delete_file(&self, remote: &str) -> bool {
        let (ok, output) = self.run(&["delete", remote, "--permanent"]).await;
        ok && !Self::looks_like_failure(&output)
    }
}
