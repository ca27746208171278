//! # synclist repository crate
//!
//! The client-side heart of synclist: the [`Repository`] owns the registry
//! CRDT and one task-list CRDT per list, routes user intents through them,
//! persists the resulting operations with periodic snapshots, records
//! undo/redo history with synthesised inverses, and fans out freshly
//! projected state to subscribers.

pub mod bus;
pub mod history;
pub mod repository;

pub use bus::{ChangeBus, ChangeEvent, SubscriptionId, Topic};
pub use history::{HistoryEntry, HistoryManager, HistoryOp, COALESCE_WINDOW};
pub use repository::{ListView, RepoError, RepoResult, Repository, SNAPSHOT_EVERY};
