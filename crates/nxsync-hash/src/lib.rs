//! nxsync-hash: content digests and checksums used for change detection and
//! resumable-upload integrity.
//!
//! - `digest`: MD5 content digests (hash cache, scanner state)
//! - `checksum`: SHA-256 whole-file checksums (resumable uploader)

pub mod checksum;
pub mod digest;

pub use checksum::{checksum_file, checksum_matches};
pub use digest::{digest_bytes, digest_file, digest_file_streaming};
