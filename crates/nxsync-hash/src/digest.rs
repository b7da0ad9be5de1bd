//! MD5 content digests for change detection.
//!
//! The digest identifies a file's content for the hash cache and scanner
//! state; it is not used for anything security-sensitive.

use std::io;
use std::path::Path;

/// Hash a byte slice in memory. Fast for small inputs.
pub fn digest_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Hash a file from disk, reading its full content.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(digest_bytes(&data))
}

/// Hash a file using the streaming interface, for files too large to read
/// fully into memory at once.
pub fn digest_file_streaming(path: &Path) -> io::Result<String> {
    use io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }

    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_digest_is_deterministic() {
        let h1 = digest_bytes(b"");
        let h2 = digest_bytes(b"");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn different_content_different_digest() {
        let h1 = digest_bytes(b"foo");
        let h2 = digest_bytes(b"bar");
        assert_ne!(h1, h2);
    }

    #[test]
    fn digest_file_and_streaming_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![7u8; 200 * 1024]).unwrap();
        drop(f);

        let whole = digest_file(&path).unwrap();
        let streamed = digest_file_streaming(&path).unwrap();
        assert_eq!(whole, streamed);
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let h = digest_bytes(b"nxsync");
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
