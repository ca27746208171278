//! The lists registry: an ordered set of list metadata entries.
//!
//! One registry exists per user. Its entries are the user's task lists,
//! ordered by fractional position; the payload is the list title. Registry
//! operations use their own envelope types (`createList`, `renameList`,
//! `reorderList`, `removeList`) but resolve with the ordinary ordered-set
//! rules.

use crate::op::{ListMeta, ListPatch, ListSnapshot, MovePayload, OpKind, Operation, TitlePayload};
use crate::ordered_set::{EntryState, OrderedSet, Placement, SetOp, Stamp};
use crate::{CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use synclist_common::{ActorId, Scope, REGISTRY_RESOURCE_ID};

/// Visible projection of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSummary {
    pub id: String,
    pub title: String,
}

fn state_version() -> u32 {
    1
}

/// Exported registry state: clock plus all entries including tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    #[serde(default = "state_version")]
    pub version: u32,
    pub clock: u64,
    pub entries: Vec<EntryState<ListMeta>>,
}

/// CRDT for the per-user collection of task lists.
#[derive(Debug, Clone)]
pub struct RegistryCrdt {
    set: OrderedSet<ListMeta>,
}

impl RegistryCrdt {
    pub fn new(actor: ActorId) -> Self {
        Self {
            set: OrderedSet::new(actor),
        }
    }

    pub fn actor(&self) -> &ActorId {
        self.set.actor()
    }

    pub fn clock_value(&self) -> u64 {
        self.set.clock_value()
    }

    /// Whether the registry knows this list id, live or tombstoned.
    pub fn contains(&self, list_id: &str) -> bool {
        self.set.get(list_id).is_some()
    }

    pub fn is_live(&self, list_id: &str) -> bool {
        self.set
            .get(list_id)
            .map(|e| !e.is_tombstoned())
            .unwrap_or(false)
    }

    pub fn title_of(&self, list_id: &str) -> Option<&str> {
        self.set
            .get(list_id)
            .filter(|e| !e.is_tombstoned())
            .map(|e| e.data.title.as_str())
    }

    /// Live lists in display order.
    pub fn visible_lists(&self) -> Vec<ListSummary> {
        self.set
            .visible()
            .into_iter()
            .map(|e| ListSummary {
                id: e.id.clone(),
                title: e.data.title.clone(),
            })
            .collect()
    }

    /// Current position of a live list, for history capture.
    pub fn position_of(&self, list_id: &str) -> Option<crate::Position> {
        self.set
            .get(list_id)
            .filter(|e| !e.is_tombstoned())
            .map(|e| e.pos.clone())
    }

    pub fn create_list(
        &mut self,
        list_id: Option<String>,
        title: &str,
        placement: &Placement,
    ) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_insert(
            list_id,
            ListMeta {
                title: title.to_string(),
            },
            placement,
        )?;
        Ok(self.envelope(stamp, op))
    }

    pub fn rename_list(&mut self, list_id: &str, title: &str) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_update(
            list_id,
            ListPatch {
                title: Some(title.to_string()),
            },
        )?;
        Ok(self.envelope(stamp, op))
    }

    pub fn reorder_list(
        &mut self,
        list_id: &str,
        placement: &Placement,
    ) -> CrdtResult<Option<Operation>> {
        Ok(self
            .set
            .generate_move(list_id, placement)?
            .map(|(stamp, op)| self.envelope(stamp, op)))
    }

    pub fn remove_list(&mut self, list_id: &str) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_remove(list_id)?;
        Ok(self.envelope(stamp, op))
    }

    fn envelope(&self, stamp: Stamp, op: SetOp<ListMeta>) -> Operation {
        let item_id = op.id().to_string();
        let kind = match op {
            SetOp::Insert { pos, data, .. } => OpKind::CreateList(ListSnapshot { pos, meta: data }),
            SetOp::Update { patch, .. } => OpKind::RenameList(TitlePayload {
                title: patch.title.unwrap_or_default(),
            }),
            SetOp::Move { pos, .. } => OpKind::ReorderList(MovePayload { pos }),
            SetOp::Remove { .. } => OpKind::RemoveList,
        };
        Operation {
            scope: Scope::Registry,
            resource_id: REGISTRY_RESOURCE_ID.to_string(),
            item_id: Some(item_id),
            actor: stamp.actor,
            clock: stamp.clock,
            kind,
        }
    }

    /// Apply a registry-scope operation from any replica. Returns whether
    /// visible state changed.
    pub fn apply(&mut self, op: &Operation) -> CrdtResult<bool> {
        op.validate()?;
        if op.scope != Scope::Registry {
            return Err(CrdtError::InvalidOperation(format!(
                "registry cannot apply {} op",
                op.scope
            )));
        }
        let item_id = op
            .item_id
            .clone()
            .ok_or_else(|| CrdtError::InvalidOperation("missing item id".to_string()))?;
        let stamp = Stamp {
            clock: op.clock,
            actor: op.actor.clone(),
        };
        let set_op = match &op.kind {
            OpKind::CreateList(snapshot) => SetOp::Insert {
                id: item_id,
                pos: snapshot.pos.clone(),
                data: snapshot.meta.clone(),
            },
            OpKind::RenameList(payload) => SetOp::Update {
                id: item_id,
                patch: ListPatch {
                    title: Some(payload.title.clone()),
                },
            },
            OpKind::ReorderList(payload) => SetOp::Move {
                id: item_id,
                pos: payload.pos.clone(),
            },
            OpKind::RemoveList => SetOp::Remove { id: item_id },
            other => {
                return Err(CrdtError::InvalidOperation(format!(
                    "{} op is not a registry operation",
                    other.type_name()
                )))
            }
        };
        Ok(self.set.apply(&stamp, &set_op))
    }

    pub fn export_state(&self) -> RegistryState {
        RegistryState {
            version: state_version(),
            clock: self.set.clock_value(),
            entries: self.set.export_entries(),
        }
    }

    pub fn reset_from_state(&mut self, state: RegistryState) {
        self.set.reset_from(state.clock, state.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(actor: &str) -> RegistryCrdt {
        RegistryCrdt::new(ActorId::new(actor))
    }

    #[test]
    fn create_rename_reorder_remove_round_trip() {
        let mut r = registry("a");
        let create = r
            .create_list(Some("l1".into()), "Groceries", &Placement::End)
            .unwrap();
        assert_eq!(create.kind.type_name(), "createList");
        r.create_list(Some("l2".into()), "Work", &Placement::End)
            .unwrap();

        r.rename_list("l1", "Food").unwrap();
        assert_eq!(r.title_of("l1"), Some("Food"));

        let reorder = r
            .reorder_list("l1", &Placement::After("l2".into()))
            .unwrap();
        assert!(reorder.is_some());
        let titles: Vec<String> = r.visible_lists().into_iter().map(|l| l.title).collect();
        assert_eq!(titles, vec!["Work", "Food"]);

        r.remove_list("l2").unwrap();
        assert_eq!(r.visible_lists().len(), 1);
        assert!(r.contains("l2"));
        assert!(!r.is_live("l2"));
    }

    #[test]
    fn replicas_converge_through_envelopes() {
        let mut a = registry("a");
        let ops = vec![
            a.create_list(Some("l1".into()), "One", &Placement::End)
                .unwrap(),
            a.create_list(Some("l2".into()), "Two", &Placement::End)
                .unwrap(),
            a.rename_list("l1", "First").unwrap(),
            a.remove_list("l2").unwrap(),
        ];

        let mut b = registry("b");
        for op in ops.iter().rev() {
            // Reverse delivery: the rename and remove arrive before their
            // insert and are dropped, then re-applied in order below.
            let _ = b.apply(op);
        }
        for op in &ops {
            b.apply(op).unwrap();
        }
        assert_eq!(a.export_state().entries, b.export_state().entries);
        assert_eq!(a.visible_lists(), b.visible_lists());
    }

    #[test]
    fn rejects_list_scope_operations() {
        let mut r = registry("a");
        let op = Operation {
            scope: Scope::Registry,
            resource_id: REGISTRY_RESOURCE_ID.to_string(),
            item_id: Some("x".to_string()),
            actor: ActorId::new("a"),
            clock: 1,
            kind: OpKind::Remove,
        };
        assert!(r.apply(&op).is_err());
    }

    #[test]
    fn state_round_trips_through_serde() {
        let mut r = registry("a");
        r.create_list(Some("l1".into()), "One", &Placement::End)
            .unwrap();
        r.remove_list("l1").unwrap();
        let state = r.export_state();
        let json = serde_json::to_string(&state).unwrap();
        let back: RegistryState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);

        let mut restored = registry("a");
        restored.reset_from_state(back);
        assert_eq!(restored.export_state(), r.export_state());
    }
}
