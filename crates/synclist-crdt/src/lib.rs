//! # synclist CRDT crate
//!
//! This crate provides the conflict-free replicated data types at the heart
//! of synclist: an ordered set with fractional positions, tombstones and
//! last-writer-wins data fields, plus the two application-level
//! specialisations built on it (the lists registry and the per-list task
//! collection).
//!
//! Every mutation is expressed as an [`Operation`] envelope stamped with a
//! `(clock, actor)` pair from the owning replica's [`LogicalClock`]. Applying
//! the same set of operations in any delivery order the sync channel can
//! produce yields the same visible state on every replica.

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod op;
pub mod ordered_set;
pub mod position;
pub mod registry;
pub mod task_list;

pub use clock::LogicalClock;
pub use op::{
    ListMeta, ListPatch, ListSnapshot, MovePayload, OpKind, Operation, TaskData, TaskPatch,
    TaskSnapshot, TitlePayload,
};
pub use ordered_set::{Entry, EntryData, EntryState, OrderedSet, Placement, SetOp, Stamp};
pub use position::{Position, PositionComponent};
pub use registry::{ListSummary, RegistryCrdt, RegistryState};
pub use task_list::{ListState, TaskListCrdt, TaskView};

/// Errors that can occur in the CRDT layer.
///
/// Generator errors (`EntryNotFound`, `Tombstoned`, `DuplicateId`,
/// `InvalidBounds`) are deterministic precondition failures surfaced to the
/// caller; they are never produced by applying remote operations, which
/// resolve conflicts silently instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CrdtError {
    #[error("invalid position bounds: {0}")]
    InvalidBounds(String),

    #[error("position exhausted after {0} components")]
    PositionExhausted(usize),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("entry is tombstoned: {0}")]
    Tombstoned(String),

    #[error("duplicate entry id: {0}")]
    DuplicateId(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;
