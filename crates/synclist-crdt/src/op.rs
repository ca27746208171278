//! Operation envelope and payload types.
//!
//! Operations are the only way replicated state changes, locally or
//! remotely. The envelope carries the addressing fields (scope, resource,
//! item, actor, clock) and a tagged payload variant; on the wire it
//! serialises to `{ type, scope, resourceId, itemId?, actor, clock,
//! payload? }`. Payloads carry exactly the fields needed for replay: inserts
//! ship the full item snapshot, updates ship only the changed fields, moves
//! ship the new position.

use crate::position::Position;
use crate::{CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use synclist_common::{ActorId, Scope};

/// Data fields of one task. Unknown fields are ignored on decode so newer
/// peers can add fields without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub note: String,
}

/// Partial update of a task; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.done.is_none() && self.note.is_none()
    }
}

/// Data payload of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub title: String,
}

/// Partial update of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Insert payload for a task: position plus the full data snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub pos: Position,
    #[serde(flatten)]
    pub data: TaskData,
}

/// Insert payload for a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub pos: Position,
    #[serde(flatten)]
    pub meta: ListMeta,
}

/// Payload of a move or reorder: only the new position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub pos: Position,
}

/// Payload of a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitlePayload {
    pub title: String,
}

/// The tagged operation payload. `type` and `payload` land next to the
/// envelope fields on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OpKind {
    /// Insert a task into a list.
    Insert(TaskSnapshot),
    /// Merge changed fields into a task.
    Update(TaskPatch),
    /// Reposition a task within its list.
    Move(MovePayload),
    /// Tombstone a task.
    Remove,
    /// Set a list's own title (list-level LWW scalar).
    RenameTitle(TitlePayload),
    /// Insert a list into the registry.
    CreateList(ListSnapshot),
    /// Retitle a registry entry.
    RenameList(TitlePayload),
    /// Reposition a registry entry.
    ReorderList(MovePayload),
    /// Tombstone a registry entry.
    RemoveList,
}

impl OpKind {
    /// Stable wire name of this operation type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OpKind::Insert(_) => "insert",
            OpKind::Update(_) => "update",
            OpKind::Move(_) => "move",
            OpKind::Remove => "remove",
            OpKind::RenameTitle(_) => "renameTitle",
            OpKind::CreateList(_) => "createList",
            OpKind::RenameList(_) => "renameList",
            OpKind::ReorderList(_) => "reorderList",
            OpKind::RemoveList => "removeList",
        }
    }

    /// Scope this payload variant belongs to.
    pub fn expected_scope(&self) -> Scope {
        match self {
            OpKind::Insert(_)
            | OpKind::Update(_)
            | OpKind::Move(_)
            | OpKind::Remove
            | OpKind::RenameTitle(_) => Scope::List,
            OpKind::CreateList(_)
            | OpKind::RenameList(_)
            | OpKind::ReorderList(_)
            | OpKind::RemoveList => Scope::Registry,
        }
    }

    /// Whether this variant addresses an item inside the resource.
    pub fn requires_item_id(&self) -> bool {
        !matches!(self, OpKind::RenameTitle(_))
    }
}

/// The wire and storage form of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub scope: Scope,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub actor: ActorId,
    pub clock: u64,
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Operation {
    /// Check the envelope invariants: a positive clock, a non-empty actor, a
    /// payload matching the scope, and an item id where the type needs one.
    pub fn validate(&self) -> CrdtResult<()> {
        if self.clock == 0 {
            return Err(CrdtError::InvalidOperation(
                "operation clock must be positive".to_string(),
            ));
        }
        if self.actor.is_empty() {
            return Err(CrdtError::InvalidOperation(
                "operation actor must not be empty".to_string(),
            ));
        }
        if self.kind.expected_scope() != self.scope {
            return Err(CrdtError::InvalidOperation(format!(
                "{} op does not belong to scope {}",
                self.kind.type_name(),
                self.scope
            )));
        }
        if self.kind.requires_item_id() && self.item_id.is_none() {
            return Err(CrdtError::InvalidOperation(format!(
                "{} op requires an item id",
                self.kind.type_name()
            )));
        }
        Ok(())
    }
}
