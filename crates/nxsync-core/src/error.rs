use thiserror::Error;

pub type NxsyncResult<T> = Result<T, NxsyncError>;

#[derive(Debug, Error)]
pub enum NxsyncError {
    /// The remote CLI is missing or not authenticated; aborts the run.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Invalid CLI arguments or cron expression; aborts before any work.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem or state-file error during scanning or persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success outcome from the remote CLI for a specific file.
    #[error("remote error: {0}")]
    Remote(String),

    /// Failure that triggers the resumable uploader's retry ladder.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Internal bug; never expected to occur in practice.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
