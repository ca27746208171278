//! The per-list task collection: an ordered set of tasks plus a list-level
//! title.
//!
//! The title is an LWW scalar versioned separately from the entries but
//! sharing the list's clock, so a rename and a task edit never interfere.

use crate::op::{MovePayload, OpKind, Operation, TaskData, TaskPatch, TaskSnapshot, TitlePayload};
use crate::ordered_set::{EntryState, OrderedSet, Placement, SetOp, Stamp};
use crate::position::Position;
use crate::{CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use synclist_common::{ActorId, Scope};

/// Visible projection of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub text: String,
    pub done: bool,
    pub note: String,
}

fn state_version() -> u32 {
    1
}

fn unset_actor() -> ActorId {
    ActorId::new("")
}

/// Exported list state: clock, title register and all entries including
/// tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListState {
    #[serde(default = "state_version")]
    pub version: u32,
    pub clock: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_updated_at: u64,
    #[serde(default = "unset_actor")]
    pub title_updated_by: ActorId,
    pub entries: Vec<EntryState<TaskData>>,
}

/// CRDT for one task list.
#[derive(Debug, Clone)]
pub struct TaskListCrdt {
    list_id: String,
    title: String,
    title_updated_at: u64,
    title_updated_by: ActorId,
    set: OrderedSet<TaskData>,
}

impl TaskListCrdt {
    pub fn new(actor: ActorId, list_id: impl Into<String>) -> Self {
        Self {
            list_id: list_id.into(),
            title: String::new(),
            title_updated_at: 0,
            title_updated_by: unset_actor(),
            set: OrderedSet::new(actor),
        }
    }

    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn actor(&self) -> &ActorId {
        self.set.actor()
    }

    pub fn clock_value(&self) -> u64 {
        self.set.clock_value()
    }

    pub fn get_task(&self, task_id: &str) -> Option<&crate::Entry<TaskData>> {
        self.set.get(task_id)
    }

    /// Live tasks in visible order.
    pub fn visible_tasks(&self) -> Vec<TaskView> {
        self.set
            .visible()
            .into_iter()
            .map(|e| TaskView {
                id: e.id.clone(),
                text: e.data.text.clone(),
                done: e.data.done,
                note: e.data.note.clone(),
            })
            .collect()
    }

    /// Resolve a placement against the current visible order without
    /// emitting anything.
    pub fn resolve_placement(&self, placement: &Placement) -> CrdtResult<Position> {
        self.set.resolve_placement(placement)
    }

    /// Current position of a live task, for history capture.
    pub fn position_of(&self, task_id: &str) -> Option<Position> {
        self.set
            .get(task_id)
            .filter(|e| !e.is_tombstoned())
            .map(|e| e.pos.clone())
    }

    pub fn insert_task(
        &mut self,
        task_id: Option<String>,
        data: TaskData,
        placement: &Placement,
    ) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_insert(task_id, data, placement)?;
        Ok(self.envelope(stamp, op))
    }

    pub fn update_task(&mut self, task_id: &str, patch: TaskPatch) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_update(task_id, patch)?;
        Ok(self.envelope(stamp, op))
    }

    pub fn move_task(
        &mut self,
        task_id: &str,
        placement: &Placement,
    ) -> CrdtResult<Option<Operation>> {
        Ok(self
            .set
            .generate_move(task_id, placement)?
            .map(|(stamp, op)| self.envelope(stamp, op)))
    }

    pub fn remove_task(&mut self, task_id: &str) -> CrdtResult<Operation> {
        let (stamp, op) = self.set.generate_remove(task_id)?;
        Ok(self.envelope(stamp, op))
    }

    /// Set the list-level title and emit the rename op.
    pub fn rename_title(&mut self, title: &str) -> Operation {
        let stamp = self.set.next_stamp();
        self.title = title.to_string();
        self.title_updated_at = stamp.clock;
        self.title_updated_by = stamp.actor.clone();
        Operation {
            scope: Scope::List,
            resource_id: self.list_id.clone(),
            item_id: None,
            actor: stamp.actor,
            clock: stamp.clock,
            kind: OpKind::RenameTitle(TitlePayload {
                title: title.to_string(),
            }),
        }
    }

    fn envelope(&self, stamp: Stamp, op: SetOp<TaskData>) -> Operation {
        let item_id = op.id().to_string();
        let kind = match op {
            SetOp::Insert { pos, data, .. } => OpKind::Insert(TaskSnapshot { pos, data }),
            SetOp::Update { patch, .. } => OpKind::Update(patch),
            SetOp::Move { pos, .. } => OpKind::Move(MovePayload { pos }),
            SetOp::Remove { .. } => OpKind::Remove,
        };
        Operation {
            scope: Scope::List,
            resource_id: self.list_id.clone(),
            item_id: Some(item_id),
            actor: stamp.actor,
            clock: stamp.clock,
            kind,
        }
    }

    /// Apply a list-scope operation addressed to this list. Returns whether
    /// visible state changed.
    pub fn apply(&mut self, op: &Operation) -> CrdtResult<bool> {
        op.validate()?;
        if op.scope != Scope::List || op.resource_id != self.list_id {
            return Err(CrdtError::InvalidOperation(format!(
                "operation for {}/{} applied to list {}",
                op.scope, op.resource_id, self.list_id
            )));
        }
        if let OpKind::RenameTitle(payload) = &op.kind {
            self.set.observe(op.clock);
            // Title LWW: clock first, actor as tie-breaker.
            if (op.clock, &op.actor) > (self.title_updated_at, &self.title_updated_by) {
                self.title = payload.title.clone();
                self.title_updated_at = op.clock;
                self.title_updated_by = op.actor.clone();
                return Ok(true);
            }
            return Ok(false);
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
            OpKind::Insert(snapshot) => SetOp::Insert {
                id: item_id,
                pos: snapshot.pos.clone(),
                data: snapshot.data.clone(),
            },
            OpKind::Update(patch) => SetOp::Update {
                id: item_id,
                patch: patch.clone(),
            },
            OpKind::Move(payload) => SetOp::Move {
                id: item_id,
                pos: payload.pos.clone(),
            },
            OpKind::Remove => SetOp::Remove { id: item_id },
            other => {
                return Err(CrdtError::InvalidOperation(format!(
                    "{} op is not a task-list operation",
                    other.type_name()
                )))
            }
        };
        Ok(self.set.apply(&stamp, &set_op))
    }

    pub fn export_state(&self) -> ListState {
        ListState {
            version: state_version(),
            clock: self.set.clock_value(),
            title: self.title.clone(),
            title_updated_at: self.title_updated_at,
            title_updated_by: self.title_updated_by.clone(),
            entries: self.set.export_entries(),
        }
    }

    pub fn reset_from_state(&mut self, state: ListState) {
        self.title = state.title;
        self.title_updated_at = state.title_updated_at;
        self.title_updated_by = state.title_updated_by;
        self.set.reset_from(state.clock, state.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(actor: &str) -> TaskListCrdt {
        TaskListCrdt::new(ActorId::new(actor), "l1")
    }

    fn task(text: &str) -> TaskData {
        TaskData {
            text: text.to_string(),
            ..TaskData::default()
        }
    }

    fn texts(l: &TaskListCrdt) -> Vec<String> {
        l.visible_tasks().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn task_lifecycle() {
        let mut l = list("a");
        l.insert_task(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        l.insert_task(Some("t2".into()), task("two"), &Placement::End)
            .unwrap();
        l.update_task(
            "t1",
            TaskPatch {
                done: Some(true),
                ..TaskPatch::default()
            },
        )
        .unwrap();
        l.move_task("t1", &Placement::After("t2".into())).unwrap();
        assert_eq!(texts(&l), vec!["two", "one"]);
        assert!(l.visible_tasks()[1].done);

        l.remove_task("t2").unwrap();
        assert_eq!(texts(&l), vec!["one"]);
    }

    #[test]
    fn rename_title_is_lww_with_actor_tie_break() {
        let mut l = list("replica");
        let rename = Operation {
            scope: Scope::List,
            resource_id: "l1".to_string(),
            item_id: None,
            actor: ActorId::new("bob"),
            clock: 7,
            kind: OpKind::RenameTitle(TitlePayload {
                title: "From bob".to_string(),
            }),
        };
        assert!(l.apply(&rename).unwrap());
        assert_eq!(l.title(), "From bob");

        // Same clock, lower actor: dropped.
        let lower = Operation {
            actor: ActorId::new("alice"),
            kind: OpKind::RenameTitle(TitlePayload {
                title: "From alice".to_string(),
            }),
            ..rename.clone()
        };
        assert!(!l.apply(&lower).unwrap());
        assert_eq!(l.title(), "From bob");

        // Same clock, higher actor: wins.
        let higher = Operation {
            actor: ActorId::new("carol"),
            kind: OpKind::RenameTitle(TitlePayload {
                title: "From carol".to_string(),
            }),
            ..rename.clone()
        };
        assert!(l.apply(&higher).unwrap());
        assert_eq!(l.title(), "From carol");
        // The clock was observed, so the next local stamp is above it.
        assert!(l.clock_value() >= 7);
    }

    #[test]
    fn rejects_foreign_resource_ops() {
        let mut l = list("a");
        let mut op = l
            .insert_task(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        op.resource_id = "other-list".to_string();
        assert!(l.apply(&op).is_err());
    }

    #[test]
    fn replicas_converge_via_envelopes() {
        let mut a = list("a");
        let mut ops = vec![
            a.insert_task(Some("t1".into()), task("alpha"), &Placement::End)
                .unwrap(),
            a.insert_task(Some("t2".into()), task("beta"), &Placement::Start)
                .unwrap(),
            a.rename_title("Groceries"),
        ];
        ops.push(a.remove_task("t2").unwrap());

        let mut b = list("b");
        for op in &ops {
            b.apply(op).unwrap();
        }
        assert_eq!(a.export_state(), b.export_state());
        assert_eq!(texts(&b), vec!["alpha"]);
        assert_eq!(b.title(), "Groceries");
    }

    #[test]
    fn state_round_trips_through_serde() {
        let mut l = list("a");
        l.insert_task(Some("t1".into()), task("one"), &Placement::End)
            .unwrap();
        l.rename_title("Things");
        let state = l.export_state();
        let json = serde_json::to_string(&state).unwrap();
        let back: ListState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);

        let mut restored = list("a");
        restored.reset_from_state(back);
        assert_eq!(restored.export_state(), l.export_state());
        assert_eq!(restored.title(), "Things");
    }
}
