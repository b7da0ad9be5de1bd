//! SHA-256 file checksums, used by the resumable uploader to decide whether
//! persisted upload state still matches the file on disk.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// Compute the SHA-256 checksum of a file's full content, as lowercase hex.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    use io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 256 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Returns true iff the file at `path` currently hashes to `expected`.
pub fn checksum_matches(path: &Path, expected: &str) -> io::Result<bool> {
    Ok(checksum_file(path)? == expected)
}
