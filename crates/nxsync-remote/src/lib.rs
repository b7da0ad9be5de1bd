//! nxsync-remote: subprocess wrapper around the external remote-CLI backup tool.

pub mod client;

pub use client::{Availability, RemoteClient, RemoteOps, TransferOutcome};
