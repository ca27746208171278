//! # synclist client crate
//!
//! The sync client keeps a local [`Repository`](synclist_repo::Repository)
//! converged with the sync server: it bootstraps from the server's active
//! dataset generation, pushes the outbox in submission order, pulls remote
//! operations past its cursor, and backs off exponentially while the server
//! is unreachable. All loops are cooperative tasks sharing one cancellation
//! token.

use synclist_repo::RepoError;

pub mod backoff;
pub mod monitor;
pub mod transport;

pub use backoff::Backoff;
pub use monitor::{SyncConfig, SyncMonitor, SyncStatus};
pub use transport::{HttpTransport, PushOutcome, PullOutcome, ResetOutcome, SyncTransport};

/// Errors raised by the sync client.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport failure; the outbox is retained and the backoff schedule
    /// applies.
    #[error("network unavailable: {0}")]
    Network(String),

    /// The server's active generation differs from ours; recover by
    /// re-bootstrapping.
    #[error("dataset generation mismatch; active key is {0}")]
    GenerationMismatch(String),

    /// A snapshot reset was rejected because the key already exists.
    #[error("snapshot publish rejected: {0}")]
    Publish(String),

    #[error("malformed server payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
