//! # synclist store crate
//!
//! Durable client-side persistence for the replication core: per-list
//! snapshots and op logs, the registry snapshot and op log, the sync cursor
//! and the outbox of operations awaiting server acknowledgement.
//!
//! The [`StateStore`] trait abstracts the backend; [`SqliteStateStore`] is
//! the durable implementation and [`MemoryStateStore`] the volatile one used
//! by tests and tooling. All multi-row writes are transactional: a reader
//! never observes an op log without its matching snapshot prune.

use synclist_crdt::{ListState, Operation, RegistryState};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

/// Errors raised by the storage engine. Callers treat these as advisory:
/// in-memory state stays live and the next successful write supersedes.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent sync client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub client_id: String,
    pub last_server_seq: i64,
    pub dataset_generation_key: Option<String>,
}

/// One queued outbox operation; `seq` is the local FIFO position.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub seq: i64,
    pub op: Operation,
}

/// Hydration data for one list: optional snapshot plus the ops to replay on
/// top of it, ordered by `(clock, actor)`.
#[derive(Debug, Clone)]
pub struct ListRecord {
    pub list_id: String,
    pub snapshot: Option<ListState>,
    pub ops: Vec<Operation>,
}

/// The durable key-value surface behind the repository.
pub trait StateStore: Send {
    /// Append registry ops and, when given, replace the registry snapshot in
    /// the same transaction, pruning ops covered by the snapshot clock.
    fn persist_registry_ops(
        &mut self,
        ops: &[Operation],
        snapshot: Option<&RegistryState>,
    ) -> StorageResult<()>;

    /// Registry snapshot plus the ops to replay on top of it.
    fn load_registry(&self) -> StorageResult<(Option<RegistryState>, Vec<Operation>)>;

    /// Append ops for one list and, when given, replace that list's snapshot
    /// in the same transaction, pruning ops covered by the snapshot clock.
    fn persist_list_ops(
        &mut self,
        list_id: &str,
        ops: &[Operation],
        snapshot: Option<&ListState>,
    ) -> StorageResult<()>;

    /// All persisted lists with their snapshots and replay ops.
    fn load_lists(&self) -> StorageResult<Vec<ListRecord>>;

    /// Drop every snapshot and op, registry and lists alike. Sync state and
    /// outbox are untouched; used when state is replaced wholesale.
    fn clear_state(&mut self) -> StorageResult<()>;

    fn load_sync_state(&self) -> StorageResult<Option<SyncState>>;

    fn save_sync_state(&mut self, state: &SyncState) -> StorageResult<()>;

    /// Enqueue ops at the tail of the outbox.
    fn outbox_push(&mut self, ops: &[Operation]) -> StorageResult<()>;

    /// The oldest `limit` outbox entries without removing them.
    fn outbox_peek(&self, limit: usize) -> StorageResult<Vec<OutboxEntry>>;

    /// Drop entries up to and including `seq`, after a successful push.
    fn outbox_remove_through(&mut self, seq: i64) -> StorageResult<()>;

    fn outbox_clear(&mut self) -> StorageResult<()>;

    fn outbox_len(&self) -> StorageResult<usize>;
}
