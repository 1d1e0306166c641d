use std::path::PathBuf;

use courier_model::ModelError;
use thiserror::Error;

/// Failures reported by a [`MessageStore`](crate::store::MessageStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store returned {actual} identifiers for a batch of {expected}")]
    IdCountMismatch { expected: usize, actual: usize },

    #[error("store connection is closed")]
    Closed,
}

/// Failures reading, writing, or removing the recovery snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot at {path} is corrupt")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Raised when a batch keeps failing after every retry attempt was spent.
///
/// The batch is not dropped: its messages are back at the front of the
/// pending queue when this is published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "flush failed after {attempts} retry attempts with {pending} messages pending: {reason}"
)]
pub struct FlushExhausted {
    pub attempts: u32,
    pub pending: usize,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] ModelError),

    #[error("writer is shut down; store unavailable")]
    StoreUnavailable,

    #[error(transparent)]
    FlushExhausted(#[from] FlushExhausted),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub type Result<T> = std::result::Result<T, WriterError>;
