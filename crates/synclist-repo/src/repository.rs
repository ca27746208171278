//! The repository: routes user intents through the CRDTs, persists operation
//! batches with periodic snapshots, records undo history and fans out change
//! events.
//!
//! The repository is single-threaded and cooperative: every entry point is
//! async and takes `&mut self`, so intents issued from subscriber callbacks
//! queue behind the current write instead of interleaving with it.
//! Storage failures are advisory: in-memory state stays live, the error is
//! logged and reported through the error handler, and the next successful
//! write supersedes.

use crate::bus::{ChangeBus, ChangeEvent, SubscriptionId, Topic};
use crate::history::{HistoryEntry, HistoryManager, HistoryOp};
use std::collections::HashMap;
use synclist_common::{ActorId, Scope, REGISTRY_RESOURCE_ID};
use synclist_crdt::{
    CrdtError, ListSnapshot, ListSummary, MovePayload, OpKind, Operation, Placement, Position,
    RegistryCrdt, TaskData, TaskListCrdt, TaskPatch, TaskSnapshot, TaskView, TitlePayload,
};
use synclist_protocol::{ListSnapshotEntry, SnapshotData, SnapshotDocument};
use synclist_store::{OutboxEntry, StateStore, StorageError, SyncState};

/// A new snapshot is persisted (and covered ops pruned) after this many ops
/// per resource.
pub const SNAPSHOT_EVERY: u32 = 32;

/// Errors surfaced by repository intents.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Full visible projection of one list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListView {
    pub id: String,
    pub title: String,
    pub tasks: Vec<TaskView>,
}

type StorageErrorHandler = Box<dyn Fn(&str, &StorageError) + Send>;

pub struct Repository {
    actor: ActorId,
    registry: RegistryCrdt,
    lists: HashMap<String, TaskListCrdt>,
    store: Box<dyn StateStore>,
    history: HistoryManager,
    bus: ChangeBus,
    snapshot_every: u32,
    ops_since_snapshot: HashMap<String, u32>,
    /// Ids that history replay had to re-create under a fresh id (tombstones
    /// are final); older history entries resolve through this map.
    history_aliases: HashMap<String, String>,
    storage_error_handler: Option<StorageErrorHandler>,
}

impl Repository {
    /// Load all persisted state and replay the op logs on top of the
    /// snapshots. Malformed records were already skipped by the store;
    /// operations the CRDTs reject are skipped with a warning.
    pub async fn hydrate(actor: ActorId, store: Box<dyn StateStore>) -> RepoResult<Self> {
        let (registry_snapshot, registry_ops) = store.load_registry()?;
        let mut registry = RegistryCrdt::new(actor.clone());
        if let Some(state) = registry_snapshot {
            registry.reset_from_state(state);
        }
        for op in registry_ops {
            if let Err(e) = registry.apply(&op) {
                log::warn!("skipping registry op during hydration: {e}");
            }
        }

        let mut lists = HashMap::new();
        for record in store.load_lists()? {
            let mut list = TaskListCrdt::new(actor.clone(), record.list_id.clone());
            if let Some(state) = record.snapshot {
                list.reset_from_state(state);
            }
            for op in record.ops {
                if let Err(e) = list.apply(&op) {
                    log::warn!("skipping op for list {} during hydration: {e}", record.list_id);
                }
            }
            lists.insert(record.list_id, list);
        }

        Ok(Self {
            actor,
            registry,
            lists,
            store,
            history: HistoryManager::new(),
            bus: ChangeBus::new(),
            snapshot_every: SNAPSHOT_EVERY,
            ops_since_snapshot: HashMap::new(),
            history_aliases: HashMap::new(),
            storage_error_handler: None,
        })
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Install the advisory storage-error callback.
    pub fn set_storage_error_handler(&mut self, handler: StorageErrorHandler) {
        self.storage_error_handler = Some(handler);
    }

    // === Projections ===

    pub fn lists(&self) -> Vec<ListSummary> {
        self.registry.visible_lists()
    }

    pub fn list_view(&self, list_id: &str) -> Option<ListView> {
        if !self.registry.is_live(list_id) {
            return None;
        }
        let list = self.lists.get(list_id)?;
        Some(ListView {
            id: list_id.to_string(),
            title: list.title().to_string(),
            tasks: list.visible_tasks(),
        })
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // === Subscriptions ===

    pub fn subscribe(
        &mut self,
        topic: Topic,
        handler: Box<dyn Fn(&ChangeEvent) + Send>,
    ) -> SubscriptionId {
        self.bus.subscribe(topic, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    // === List intents ===

    /// Create a list at the end of the registry order; returns its id.
    pub async fn create_list(&mut self, title: &str) -> RepoResult<String> {
        let op = self.registry.create_list(None, title, &Placement::End)?;
        let list_id = required_item_id(&op)?;
        let mut list = TaskListCrdt::new(self.actor.clone(), list_id.clone());
        let title_op = list.rename_title(title);
        let pos = position_of_create(&op)?;
        self.lists.insert(list_id.clone(), list);

        let entry = HistoryEntry::new(
            vec![
                registry_hop(
                    &list_id,
                    OpKind::CreateList(ListSnapshot {
                        pos,
                        meta: synclist_crdt::ListMeta {
                            title: title.to_string(),
                        },
                    }),
                ),
                list_title_hop(&list_id, title),
            ],
            vec![registry_hop(&list_id, OpKind::RemoveList)],
            "create list",
            None,
        );
        self.commit(vec![op], vec![(list_id.clone(), vec![title_op])], Some(entry));
        Ok(list_id)
    }

    /// Rename a list: updates the registry entry and the list's own title.
    pub async fn rename_list(&mut self, list_id: &str, title: &str) -> RepoResult<()> {
        let old_registry_title = self
            .registry
            .title_of(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?
            .to_string();
        let registry_op = self.registry.rename_list(list_id, title)?;
        let list = self.get_or_create_list(list_id);
        let old_list_title = list.title().to_string();
        let title_op = list.rename_title(title);

        let entry = HistoryEntry::new(
            vec![
                registry_hop(
                    list_id,
                    OpKind::RenameList(TitlePayload {
                        title: title.to_string(),
                    }),
                ),
                list_title_hop(list_id, title),
            ],
            vec![
                list_title_hop(list_id, &old_list_title),
                registry_hop(
                    list_id,
                    OpKind::RenameList(TitlePayload {
                        title: old_registry_title,
                    }),
                ),
            ],
            "rename list",
            Some(format!("rename-list:{list_id}")),
        );
        self.commit(
            vec![registry_op],
            vec![(list_id.to_string(), vec![title_op])],
            Some(entry),
        );
        Ok(())
    }

    /// Reorder a list in the registry. Returns false when the placement
    /// resolves to the current position and nothing is emitted.
    pub async fn reorder_list(&mut self, list_id: &str, placement: Placement) -> RepoResult<bool> {
        let old_pos = self
            .registry
            .position_of(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let Some(op) = self.registry.reorder_list(list_id, &placement)? else {
            return Ok(false);
        };
        let new_pos = position_of_move(&op)?;
        let entry = HistoryEntry::new(
            vec![registry_hop(
                list_id,
                OpKind::ReorderList(MovePayload { pos: new_pos }),
            )],
            vec![registry_hop(
                list_id,
                OpKind::ReorderList(MovePayload { pos: old_pos }),
            )],
            "reorder list",
            None,
        );
        self.commit(vec![op], Vec::new(), Some(entry));
        Ok(true)
    }

    /// Tombstone a list in the registry. The list's tasks stay in place so a
    /// concurrent editor loses nothing; undo restores the visible content.
    pub async fn remove_list(&mut self, list_id: &str) -> RepoResult<()> {
        let pos = self
            .registry
            .position_of(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let title = self
            .registry
            .title_of(list_id)
            .unwrap_or_default()
            .to_string();
        let inverse = self.synthesize_list_restore(list_id, pos, &title);
        let op = self.registry.remove_list(list_id)?;
        let entry = HistoryEntry::new(
            vec![registry_hop(list_id, OpKind::RemoveList)],
            inverse,
            "remove list",
            None,
        );
        self.commit(vec![op], Vec::new(), Some(entry));
        Ok(())
    }

    // === Task intents ===

    /// Insert a task; returns its id.
    pub async fn insert_task(
        &mut self,
        list_id: &str,
        data: TaskData,
        placement: Placement,
    ) -> RepoResult<String> {
        self.require_live_list(list_id)?;
        let list = self.get_or_create_list(list_id);
        let op = list.insert_task(None, data.clone(), &placement)?;
        let task_id = required_item_id(&op)?;
        let pos = position_of_insert(&op)?;

        let entry = HistoryEntry::new(
            vec![task_hop(
                list_id,
                &task_id,
                OpKind::Insert(TaskSnapshot { pos, data }),
            )],
            vec![task_hop(list_id, &task_id, OpKind::Remove)],
            "insert task",
            None,
        );
        self.commit(Vec::new(), vec![(list_id.to_string(), vec![op])], Some(entry));
        Ok(task_id)
    }

    /// Merge changed fields into a task. Rapid edits to the same text or
    /// note field coalesce into a single undo step.
    pub async fn update_task(
        &mut self,
        list_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> RepoResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let coalesce_key = coalesce_key_for(&patch, list_id, task_id);
        self.apply_task_update(list_id, task_id, patch, "edit task", coalesce_key)
    }

    /// Flip a task's done flag; returns the new value.
    pub async fn toggle_task(&mut self, list_id: &str, task_id: &str) -> RepoResult<bool> {
        let list = self
            .lists
            .get(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let entry = list
            .get_task(task_id)
            .filter(|e| !e.is_tombstoned())
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
        let done = !entry.data.done;
        self.apply_task_update(
            list_id,
            task_id,
            TaskPatch {
                done: Some(done),
                ..TaskPatch::default()
            },
            "toggle task",
            None,
        )?;
        Ok(done)
    }

    fn apply_task_update(
        &mut self,
        list_id: &str,
        task_id: &str,
        patch: TaskPatch,
        label: &str,
        coalesce_key: Option<String>,
    ) -> RepoResult<()> {
        self.require_live_list(list_id)?;
        let list = self
            .lists
            .get_mut(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let before = list
            .get_task(task_id)
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?
            .data
            .clone();
        let inverse_patch = inverse_patch_for(&patch, &before);
        let op = list.update_task(task_id, patch.clone())?;

        let entry = HistoryEntry::new(
            vec![task_hop(list_id, task_id, OpKind::Update(patch))],
            vec![task_hop(list_id, task_id, OpKind::Update(inverse_patch))],
            label,
            coalesce_key,
        );
        self.commit(Vec::new(), vec![(list_id.to_string(), vec![op])], Some(entry));
        Ok(())
    }

    /// Tombstone a task.
    pub async fn remove_task(&mut self, list_id: &str, task_id: &str) -> RepoResult<()> {
        self.require_live_list(list_id)?;
        let list = self
            .lists
            .get_mut(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let before = list
            .get_task(task_id)
            .filter(|e| !e.is_tombstoned())
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
        let pos = before.pos.clone();
        let data = before.data.clone();
        let op = list.remove_task(task_id)?;

        let entry = HistoryEntry::new(
            vec![task_hop(list_id, task_id, OpKind::Remove)],
            vec![task_hop(
                list_id,
                task_id,
                OpKind::Insert(TaskSnapshot { pos, data }),
            )],
            "remove task",
            None,
        );
        self.commit(Vec::new(), vec![(list_id.to_string(), vec![op])], Some(entry));
        Ok(())
    }

    /// Reposition a task within its list. Returns false when nothing moved.
    pub async fn move_task_within_list(
        &mut self,
        list_id: &str,
        task_id: &str,
        placement: Placement,
    ) -> RepoResult<bool> {
        self.require_live_list(list_id)?;
        let list = self
            .lists
            .get_mut(list_id)
            .ok_or_else(|| RepoError::ListNotFound(list_id.to_string()))?;
        let old_pos = list
            .position_of(task_id)
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
        let Some(op) = list.move_task(task_id, &placement)? else {
            return Ok(false);
        };
        let new_pos = position_of_move(&op)?;

        let entry = HistoryEntry::new(
            vec![task_hop(
                list_id,
                task_id,
                OpKind::Move(MovePayload { pos: new_pos }),
            )],
            vec![task_hop(
                list_id,
                task_id,
                OpKind::Move(MovePayload { pos: old_pos }),
            )],
            "move task",
            None,
        );
        self.commit(Vec::new(), vec![(list_id.to_string(), vec![op])], Some(entry));
        Ok(true)
    }

    /// Move a task to another list: a remove on the source and an insert on
    /// the target, persisted independently but undone as one step. The task
    /// keeps its id across lists.
    pub async fn move_task(
        &mut self,
        source_list_id: &str,
        target_list_id: &str,
        task_id: &str,
        placement: Placement,
    ) -> RepoResult<()> {
        self.require_live_list(source_list_id)?;
        self.require_live_list(target_list_id)?;
        let source = self
            .lists
            .get(source_list_id)
            .ok_or_else(|| RepoError::ListNotFound(source_list_id.to_string()))?;
        let before = source
            .get_task(task_id)
            .filter(|e| !e.is_tombstoned())
            .ok_or_else(|| RepoError::TaskNotFound(task_id.to_string()))?;
        let old_pos = before.pos.clone();
        let data = before.data.clone();

        // Resolve the target position before mutating anything, so a bad
        // anchor cannot leave the task removed but not inserted.
        let target = self.get_or_create_list(target_list_id);
        if target.get_task(task_id).is_some() {
            return Err(CrdtError::DuplicateId(task_id.to_string()).into());
        }
        let target_pos = target.resolve_placement(&placement)?;

        let remove_op = self
            .lists
            .get_mut(source_list_id)
            .ok_or_else(|| RepoError::ListNotFound(source_list_id.to_string()))?
            .remove_task(task_id)?;
        let insert_op = self
            .lists
            .get_mut(target_list_id)
            .ok_or_else(|| RepoError::ListNotFound(target_list_id.to_string()))?
            .insert_task(
                Some(task_id.to_string()),
                data.clone(),
                &Placement::At(target_pos.clone()),
            )?;

        let entry = HistoryEntry::new(
            vec![
                task_hop(source_list_id, task_id, OpKind::Remove),
                task_hop(
                    target_list_id,
                    task_id,
                    OpKind::Insert(TaskSnapshot {
                        pos: target_pos,
                        data: data.clone(),
                    }),
                ),
            ],
            vec![
                task_hop(target_list_id, task_id, OpKind::Remove),
                task_hop(
                    source_list_id,
                    task_id,
                    OpKind::Insert(TaskSnapshot { pos: old_pos, data }),
                ),
            ],
            "move task to list",
            None,
        );
        self.commit(
            Vec::new(),
            vec![
                (source_list_id.to_string(), vec![remove_op]),
                (target_list_id.to_string(), vec![insert_op]),
            ],
            Some(entry),
        );
        Ok(())
    }

    // === Undo / redo ===

    /// Revert the newest recorded step. Returns false when there is nothing
    /// to undo.
    pub async fn undo(&mut self) -> RepoResult<bool> {
        let Some(entry) = self.history.pop_undo() else {
            return Ok(false);
        };
        self.history.suppress();
        let result = self.replay(&entry.inverse);
        self.history.resume();
        let reforward = result?;
        self.history.push_redo(HistoryEntry::new(
            reforward,
            entry.inverse.clone(),
            entry.label,
            None,
        ));
        Ok(true)
    }

    /// Re-apply the newest undone step. Returns false when there is nothing
    /// to redo.
    pub async fn redo(&mut self) -> RepoResult<bool> {
        let Some(entry) = self.history.pop_redo() else {
            return Ok(false);
        };
        self.history.suppress();
        let result = self.replay(&entry.forward);
        self.history.resume();
        let inverse = result?;
        self.history.push_undo(HistoryEntry::new(
            entry.forward.clone(),
            inverse,
            entry.label,
            None,
        ));
        Ok(true)
    }

    /// Apply unstamped descriptors through the ordinary generators and
    /// return the descriptors that revert them, in replay order.
    fn replay(&mut self, ops: &[HistoryOp]) -> RepoResult<Vec<HistoryOp>> {
        let mut inverse_groups: Vec<Vec<HistoryOp>> = Vec::new();
        let mut registry_ops: Vec<Operation> = Vec::new();
        let mut list_ops: Vec<(String, Vec<Operation>)> = Vec::new();

        for hop in ops {
            let resource_id = self.resolve_alias(&hop.resource_id);
            let item_id = hop.item_id.as_ref().map(|id| self.resolve_alias(id));

            match (&hop.scope, &hop.kind) {
                (Scope::Registry, OpKind::CreateList(snapshot)) => {
                    let desired =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let placement = Placement::At(snapshot.pos.clone());
                    let (op, actual_id) = match self.registry.create_list(
                        Some(desired.clone()),
                        &snapshot.meta.title,
                        &placement,
                    ) {
                        Ok(op) => (op, desired),
                        Err(CrdtError::Tombstoned(_)) | Err(CrdtError::DuplicateId(_)) => {
                            let op = self.registry.create_list(
                                None,
                                &snapshot.meta.title,
                                &placement,
                            )?;
                            let fresh = required_item_id(&op)?;
                            self.history_aliases.insert(desired, fresh.clone());
                            (op, fresh)
                        }
                        Err(e) => return Err(e.into()),
                    };
                    self.get_or_create_list(&actual_id);
                    inverse_groups.push(vec![registry_hop(&actual_id, OpKind::RemoveList)]);
                    registry_ops.push(op);
                }
                (Scope::Registry, OpKind::RenameList(payload)) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let old = self
                        .registry
                        .title_of(&id)
                        .unwrap_or_default()
                        .to_string();
                    registry_ops.push(self.registry.rename_list(&id, &payload.title)?);
                    inverse_groups.push(vec![registry_hop(
                        &id,
                        OpKind::RenameList(TitlePayload { title: old }),
                    )]);
                }
                (Scope::Registry, OpKind::ReorderList(payload)) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let old = self
                        .registry
                        .position_of(&id)
                        .ok_or_else(|| CrdtError::EntryNotFound(id.clone()))?;
                    if let Some(op) = self
                        .registry
                        .reorder_list(&id, &Placement::At(payload.pos.clone()))?
                    {
                        registry_ops.push(op);
                        inverse_groups.push(vec![registry_hop(
                            &id,
                            OpKind::ReorderList(MovePayload { pos: old }),
                        )]);
                    }
                }
                (Scope::Registry, OpKind::RemoveList) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let pos = self
                        .registry
                        .position_of(&id)
                        .ok_or_else(|| CrdtError::EntryNotFound(id.clone()))?;
                    let title = self.registry.title_of(&id).unwrap_or_default().to_string();
                    let restore = self.synthesize_list_restore(&id, pos, &title);
                    registry_ops.push(self.registry.remove_list(&id)?);
                    inverse_groups.push(restore);
                }
                (Scope::List, OpKind::Insert(snapshot)) => {
                    let desired =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let list = self.get_or_create_list(&resource_id);
                    let placement = Placement::At(snapshot.pos.clone());
                    let (op, actual_id) = match list.insert_task(
                        Some(desired.clone()),
                        snapshot.data.clone(),
                        &placement,
                    ) {
                        Ok(op) => (op, desired),
                        Err(CrdtError::Tombstoned(_)) | Err(CrdtError::DuplicateId(_)) => {
                            let op = list.insert_task(None, snapshot.data.clone(), &placement)?;
                            let fresh = required_item_id(&op)?;
                            self.history_aliases.insert(desired, fresh.clone());
                            (op, fresh)
                        }
                        Err(e) => return Err(e.into()),
                    };
                    inverse_groups.push(vec![task_hop(&resource_id, &actual_id, OpKind::Remove)]);
                    push_list_op(&mut list_ops, &resource_id, op);
                }
                (Scope::List, OpKind::Update(patch)) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let list = self.get_or_create_list(&resource_id);
                    let before = list
                        .get_task(&id)
                        .ok_or_else(|| CrdtError::EntryNotFound(id.clone()))?
                        .data
                        .clone();
                    let inverse = inverse_patch_for(patch, &before);
                    let op = list.update_task(&id, patch.clone())?;
                    inverse_groups.push(vec![task_hop(&resource_id, &id, OpKind::Update(inverse))]);
                    push_list_op(&mut list_ops, &resource_id, op);
                }
                (Scope::List, OpKind::Move(payload)) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let list = self.get_or_create_list(&resource_id);
                    let old = list
                        .position_of(&id)
                        .ok_or_else(|| CrdtError::EntryNotFound(id.clone()))?;
                    if let Some(op) = list.move_task(&id, &Placement::At(payload.pos.clone()))? {
                        inverse_groups.push(vec![task_hop(
                            &resource_id,
                            &id,
                            OpKind::Move(MovePayload { pos: old }),
                        )]);
                        push_list_op(&mut list_ops, &resource_id, op);
                    }
                }
                (Scope::List, OpKind::Remove) => {
                    let id =
                        item_id.ok_or_else(|| CrdtError::InvalidOperation("missing id".into()))?;
                    let list = self.get_or_create_list(&resource_id);
                    let before = list
                        .get_task(&id)
                        .ok_or_else(|| CrdtError::EntryNotFound(id.clone()))?;
                    let pos = before.pos.clone();
                    let data = before.data.clone();
                    let op = list.remove_task(&id)?;
                    inverse_groups.push(vec![task_hop(
                        &resource_id,
                        &id,
                        OpKind::Insert(TaskSnapshot { pos, data }),
                    )]);
                    push_list_op(&mut list_ops, &resource_id, op);
                }
                (Scope::List, OpKind::RenameTitle(payload)) => {
                    let list = self.get_or_create_list(&resource_id);
                    let old = list.title().to_string();
                    let op = list.rename_title(&payload.title);
                    inverse_groups.push(vec![list_title_hop(&resource_id, &old)]);
                    push_list_op(&mut list_ops, &resource_id, op);
                }
                (scope, kind) => {
                    return Err(CrdtError::InvalidOperation(format!(
                        "{} descriptor under {scope} scope",
                        kind.type_name()
                    ))
                    .into())
                }
            }
        }

        self.commit(registry_ops, list_ops, None);
        // Compound steps revert in reverse order of application.
        inverse_groups.reverse();
        Ok(inverse_groups.into_iter().flatten().collect())
    }

    /// Descriptors that rebuild a list's registry entry, title and visible
    /// tasks; the inverse of removing it.
    fn synthesize_list_restore(
        &self,
        list_id: &str,
        pos: Position,
        title: &str,
    ) -> Vec<HistoryOp> {
        let mut ops = vec![registry_hop(
            list_id,
            OpKind::CreateList(ListSnapshot {
                pos,
                meta: synclist_crdt::ListMeta {
                    title: title.to_string(),
                },
            }),
        )];
        if let Some(list) = self.lists.get(list_id) {
            ops.push(list_title_hop(list_id, list.title()));
            for entry in list.visible_tasks() {
                if let Some(task) = list.get_task(&entry.id) {
                    ops.push(task_hop(
                        list_id,
                        &entry.id,
                        OpKind::Insert(TaskSnapshot {
                            pos: task.pos.clone(),
                            data: task.data.clone(),
                        }),
                    ));
                }
            }
        }
        ops
    }

    // === Remote operations and snapshots ===

    /// Apply operations received from the server, in delivery order. Remote
    /// ops bypass history and the outbox; ops the CRDTs reject are skipped
    /// with a warning, never aborting the batch.
    pub async fn apply_remote_ops(&mut self, ops: &[Operation]) -> RepoResult<()> {
        let mut registry_changed: Vec<Operation> = Vec::new();
        let mut lists_changed: Vec<(String, Vec<Operation>)> = Vec::new();

        for op in ops {
            match op.scope {
                Scope::Registry => match self.registry.apply(op) {
                    Ok(true) => registry_changed.push(op.clone()),
                    Ok(false) => {}
                    Err(e) => log::warn!("skipping remote registry op: {e}"),
                },
                Scope::List => {
                    let list_id = op.resource_id.clone();
                    let list = self.get_or_create_list(&list_id);
                    match list.apply(op) {
                        Ok(true) => push_list_op(&mut lists_changed, &list_id, op.clone()),
                        Ok(false) => {}
                        Err(e) => log::warn!("skipping remote op for list {list_id}: {e}"),
                    }
                }
            }
        }

        if !registry_changed.is_empty() {
            self.persist_registry(&registry_changed, false);
            self.emit_registry();
        }
        let changed_lists: Vec<String> =
            lists_changed.iter().map(|(id, _)| id.clone()).collect();
        for (list_id, ops) in lists_changed {
            self.persist_list(&list_id, &ops, false);
        }
        for list_id in changed_lists {
            self.emit_list(&list_id);
        }
        Ok(())
    }

    /// Replace all replicated state with a snapshot document, atomically
    /// from the point of view of subscribers and storage readers. Clears the
    /// history; the sync layer owns the outbox and cursor.
    pub async fn replace_with_snapshot(&mut self, doc: &SnapshotDocument) -> RepoResult<()> {
        let mut registry = RegistryCrdt::new(self.actor.clone());
        registry.reset_from_state(doc.data.registry.clone());
        self.registry = registry;

        self.lists.clear();
        for entry in &doc.data.lists {
            let mut list = TaskListCrdt::new(self.actor.clone(), entry.list_id.clone());
            list.reset_from_state(entry.state.clone());
            self.lists.insert(entry.list_id.clone(), list);
        }

        self.history.clear();
        self.history_aliases.clear();
        self.ops_since_snapshot.clear();

        if let Err(e) = self.store.clear_state() {
            self.report_storage_error("all", &e);
        }
        let registry_state = self.registry.export_state();
        if let Err(e) = self.store.persist_registry_ops(&[], Some(&registry_state)) {
            self.report_storage_error(REGISTRY_RESOURCE_ID, &e);
        }
        let list_states: Vec<(String, synclist_crdt::ListState)> = self
            .lists
            .iter()
            .map(|(id, list)| (id.clone(), list.export_state()))
            .collect();
        for (list_id, state) in list_states {
            if let Err(e) = self.store.persist_list_ops(&list_id, &[], Some(&state)) {
                self.report_storage_error(&list_id, &e);
            }
        }

        self.emit_registry();
        let ids: Vec<String> = self.lists.keys().cloned().collect();
        for list_id in ids {
            self.emit_list(&list_id);
        }
        Ok(())
    }

    /// Export all replicated state as a snapshot document.
    pub fn export_snapshot_data(&self) -> SnapshotDocument {
        let mut lists: Vec<ListSnapshotEntry> = self
            .lists
            .iter()
            .map(|(id, list)| ListSnapshotEntry {
                list_id: id.clone(),
                state: list.export_state(),
            })
            .collect();
        lists.sort_by(|a, b| a.list_id.cmp(&b.list_id));
        SnapshotDocument::new(
            chrono::Utc::now(),
            SnapshotData {
                registry: self.registry.export_state(),
                lists,
            },
        )
    }

    // === Sync-state and outbox surface for the sync client ===

    pub fn load_sync_state(&self) -> RepoResult<Option<SyncState>> {
        Ok(self.store.load_sync_state()?)
    }

    pub fn save_sync_state(&mut self, state: &SyncState) -> RepoResult<()> {
        Ok(self.store.save_sync_state(state)?)
    }

    pub fn outbox_peek(&self, limit: usize) -> RepoResult<Vec<OutboxEntry>> {
        Ok(self.store.outbox_peek(limit)?)
    }

    pub fn outbox_remove_through(&mut self, seq: i64) -> RepoResult<()> {
        Ok(self.store.outbox_remove_through(seq)?)
    }

    pub fn outbox_clear(&mut self) -> RepoResult<()> {
        Ok(self.store.outbox_clear()?)
    }

    pub fn outbox_len(&self) -> RepoResult<usize> {
        Ok(self.store.outbox_len()?)
    }

    // === Internals ===

    /// Follow the alias chain from an id recorded in history to the id that
    /// currently carries that entry's content.
    fn resolve_alias(&self, id: &str) -> String {
        let mut current = id;
        let mut hops = 0;
        while let Some(next) = self.history_aliases.get(current) {
            current = next;
            hops += 1;
            if hops > 64 {
                break;
            }
        }
        current.to_string()
    }

    fn require_live_list(&self, list_id: &str) -> RepoResult<()> {
        if self.registry.is_live(list_id) {
            Ok(())
        } else {
            Err(RepoError::ListNotFound(list_id.to_string()))
        }
    }

    fn get_or_create_list(&mut self, list_id: &str) -> &mut TaskListCrdt {
        let actor = self.actor.clone();
        self.lists
            .entry(list_id.to_string())
            .or_insert_with(|| TaskListCrdt::new(actor, list_id))
    }

    /// Persist, record, enqueue, fan out; in that order. History recording
    /// is skipped while a replay is in flight.
    fn commit(
        &mut self,
        registry_ops: Vec<Operation>,
        list_ops: Vec<(String, Vec<Operation>)>,
        history: Option<HistoryEntry>,
    ) {
        if !registry_ops.is_empty() {
            self.persist_registry(&registry_ops, false);
        }
        for (list_id, ops) in &list_ops {
            if !ops.is_empty() {
                self.persist_list(list_id, ops, false);
            }
        }
        if let Some(entry) = history {
            self.history.record(entry);
        }
        if !registry_ops.is_empty() {
            self.enqueue_outbox(&registry_ops);
        }
        for (_, ops) in &list_ops {
            if !ops.is_empty() {
                self.enqueue_outbox(ops);
            }
        }
        if !registry_ops.is_empty() {
            self.emit_registry();
        }
        for (list_id, ops) in &list_ops {
            if !ops.is_empty() {
                self.emit_list(list_id);
            }
        }
    }

    fn persist_registry(&mut self, ops: &[Operation], force_snapshot: bool) {
        let count = self
            .ops_since_snapshot
            .get(REGISTRY_RESOURCE_ID)
            .copied()
            .unwrap_or(0)
            + ops.len() as u32;
        let snapshot =
            (force_snapshot || count >= self.snapshot_every).then(|| self.registry.export_state());
        match self.store.persist_registry_ops(ops, snapshot.as_ref()) {
            Ok(()) => {
                let next = if snapshot.is_some() { 0 } else { count };
                self.ops_since_snapshot
                    .insert(REGISTRY_RESOURCE_ID.to_string(), next);
            }
            Err(e) => self.report_storage_error(REGISTRY_RESOURCE_ID, &e),
        }
    }

    fn persist_list(&mut self, list_id: &str, ops: &[Operation], force_snapshot: bool) {
        let count = self
            .ops_since_snapshot
            .get(list_id)
            .copied()
            .unwrap_or(0)
            + ops.len() as u32;
        let snapshot = (force_snapshot || count >= self.snapshot_every)
            .then(|| self.lists.get(list_id).map(|l| l.export_state()))
            .flatten();
        match self.store.persist_list_ops(list_id, ops, snapshot.as_ref()) {
            Ok(()) => {
                let next = if snapshot.is_some() { 0 } else { count };
                self.ops_since_snapshot.insert(list_id.to_string(), next);
            }
            Err(e) => self.report_storage_error(list_id, &e),
        }
    }

    fn enqueue_outbox(&mut self, ops: &[Operation]) {
        if let Err(e) = self.store.outbox_push(ops) {
            self.report_storage_error("outbox", &e);
        }
    }

    fn report_storage_error(&self, resource: &str, error: &StorageError) {
        log::warn!("storage failure on {resource} (state kept in memory): {error}");
        if let Some(handler) = &self.storage_error_handler {
            handler(resource, error);
        }
    }

    fn emit_registry(&self) {
        self.bus.emit(&ChangeEvent::Registry {
            lists: self.registry.visible_lists(),
        });
    }

    fn emit_list(&self, list_id: &str) {
        if let Some(list) = self.lists.get(list_id) {
            self.bus.emit(&ChangeEvent::List {
                list_id: list_id.to_string(),
                title: list.title().to_string(),
                tasks: list.visible_tasks(),
            });
        }
    }
}

fn required_item_id(op: &Operation) -> RepoResult<String> {
    op.item_id
        .clone()
        .ok_or_else(|| CrdtError::InvalidOperation("operation without item id".into()).into())
}

fn position_of_create(op: &Operation) -> RepoResult<Position> {
    match &op.kind {
        OpKind::CreateList(snapshot) => Ok(snapshot.pos.clone()),
        other => Err(no_position(other)),
    }
}

fn position_of_insert(op: &Operation) -> RepoResult<Position> {
    match &op.kind {
        OpKind::Insert(snapshot) => Ok(snapshot.pos.clone()),
        other => Err(no_position(other)),
    }
}

fn position_of_move(op: &Operation) -> RepoResult<Position> {
    match &op.kind {
        OpKind::Move(payload) | OpKind::ReorderList(payload) => Ok(payload.pos.clone()),
        other => Err(no_position(other)),
    }
}

fn no_position(kind: &OpKind) -> RepoError {
    CrdtError::InvalidOperation(format!("no position on {} op", kind.type_name())).into()
}

fn registry_hop(list_id: &str, kind: OpKind) -> HistoryOp {
    HistoryOp {
        scope: Scope::Registry,
        resource_id: REGISTRY_RESOURCE_ID.to_string(),
        item_id: Some(list_id.to_string()),
        kind,
    }
}

fn task_hop(list_id: &str, task_id: &str, kind: OpKind) -> HistoryOp {
    HistoryOp {
        scope: Scope::List,
        resource_id: list_id.to_string(),
        item_id: Some(task_id.to_string()),
        kind,
    }
}

fn list_title_hop(list_id: &str, title: &str) -> HistoryOp {
    HistoryOp {
        scope: Scope::List,
        resource_id: list_id.to_string(),
        item_id: None,
        kind: OpKind::RenameTitle(TitlePayload {
            title: title.to_string(),
        }),
    }
}

fn push_list_op(groups: &mut Vec<(String, Vec<Operation>)>, list_id: &str, op: Operation) {
    if let Some((_, ops)) = groups.iter_mut().find(|(id, _)| id == list_id) {
        ops.push(op);
    } else {
        groups.push((list_id.to_string(), vec![op]));
    }
}

fn coalesce_key_for(patch: &TaskPatch, list_id: &str, task_id: &str) -> Option<String> {
    match (&patch.text, patch.done, &patch.note) {
        (Some(_), None, None) => Some(format!("task-text:{list_id}/{task_id}")),
        (None, None, Some(_)) => Some(format!("task-note:{list_id}/{task_id}")),
        _ => None,
    }
}

/// Build the patch that restores `before` for exactly the fields `patch`
/// touches.
fn inverse_patch_for(patch: &TaskPatch, before: &TaskData) -> TaskPatch {
    TaskPatch {
        text: patch.text.as_ref().map(|_| before.text.clone()),
        done: patch.done.map(|_| before.done),
        note: patch.note.as_ref().map(|_| before.note.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use synclist_store::{ListRecord, MemoryStateStore, SqliteStateStore, StorageResult};

    async fn fresh_repo(actor: &str) -> Repository {
        Repository::hydrate(ActorId::new(actor), Box::new(MemoryStateStore::new()))
            .await
            .unwrap()
    }

    fn task(text: &str) -> TaskData {
        TaskData {
            text: text.to_string(),
            ..TaskData::default()
        }
    }

    fn text_patch(text: &str) -> TaskPatch {
        TaskPatch {
            text: Some(text.to_string()),
            ..TaskPatch::default()
        }
    }

    /// Content projection independent of entry ids, for undo/redo equality.
    fn projection(repo: &Repository) -> Vec<(String, Vec<(String, bool, String)>)> {
        repo.lists()
            .into_iter()
            .map(|summary| {
                let tasks = repo
                    .list_view(&summary.id)
                    .map(|view| {
                        view.tasks
                            .into_iter()
                            .map(|t| (t.text, t.done, t.note))
                            .collect()
                    })
                    .unwrap_or_default();
                (summary.title, tasks)
            })
            .collect()
    }

    #[tokio::test]
    async fn create_and_edit_flow() {
        let mut repo = fresh_repo("a").await;
        let list_id = repo.create_list("Groceries").await.unwrap();
        assert_eq!(repo.lists().len(), 1);

        let t1 = repo
            .insert_task(&list_id, task("milk"), Placement::End)
            .await
            .unwrap();
        let t2 = repo
            .insert_task(&list_id, task("bread"), Placement::End)
            .await
            .unwrap();
        repo.update_task(&list_id, &t1, text_patch("oat milk"))
            .await
            .unwrap();
        assert!(repo.toggle_task(&list_id, &t2).await.unwrap());

        let view = repo.list_view(&list_id).unwrap();
        assert_eq!(view.title, "Groceries");
        assert_eq!(view.tasks.len(), 2);
        assert_eq!(view.tasks[0].text, "oat milk");
        assert!(view.tasks[1].done);

        // Every intent queued its ops: createList + renameTitle + 2 inserts
        // + update + toggle-update.
        assert_eq!(repo.outbox_len().unwrap(), 6);
        let peeked = repo.outbox_peek(10).unwrap();
        assert_eq!(peeked[0].op.kind.type_name(), "createList");
        assert_eq!(peeked[1].op.kind.type_name(), "renameTitle");
    }

    #[tokio::test]
    async fn unknown_targets_are_rejected() {
        let mut repo = fresh_repo("a").await;
        assert!(matches!(
            repo.insert_task("nope", task("x"), Placement::End).await,
            Err(RepoError::ListNotFound(_))
        ));
        let list_id = repo.create_list("L").await.unwrap();
        assert!(matches!(
            repo.toggle_task(&list_id, "ghost").await,
            Err(RepoError::TaskNotFound(_))
        ));
        repo.remove_list(&list_id).await.unwrap();
        assert!(matches!(
            repo.insert_task(&list_id, task("x"), Placement::End).await,
            Err(RepoError::ListNotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_see_projected_state_after_mutation() {
        let mut repo = fresh_repo("a").await;
        let registry_events = Arc::new(AtomicUsize::new(0));
        let list_events = Arc::new(AtomicUsize::new(0));

        let counter = registry_events.clone();
        repo.subscribe(
            Topic::Registry,
            Box::new(move |event| {
                assert!(matches!(event, ChangeEvent::Registry { .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let list_id = repo.create_list("L").await.unwrap();

        let counter = list_events.clone();
        let expected_list = list_id.clone();
        repo.subscribe(
            Topic::List(list_id.clone()),
            Box::new(move |event| {
                if let ChangeEvent::List { list_id, tasks, .. } = event {
                    assert_eq!(list_id, &expected_list);
                    assert!(!tasks.is_empty());
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        repo.insert_task(&list_id, task("milk"), Placement::End)
            .await
            .unwrap();

        assert_eq!(registry_events.load(Ordering::SeqCst), 1);
        assert_eq!(list_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undo_redo_walks_the_whole_history() {
        let mut repo = fresh_repo("a").await;
        let mut checkpoints = vec![projection(&repo)];

        let l1 = repo.create_list("Home").await.unwrap();
        checkpoints.push(projection(&repo));
        let t1 = repo
            .insert_task(&l1, task("sweep"), Placement::End)
            .await
            .unwrap();
        checkpoints.push(projection(&repo));
        let t2 = repo
            .insert_task(&l1, task("dust"), Placement::End)
            .await
            .unwrap();
        checkpoints.push(projection(&repo));
        repo.update_task(&l1, &t1, text_patch("sweep porch"))
            .await
            .unwrap();
        checkpoints.push(projection(&repo));
        repo.toggle_task(&l1, &t2).await.unwrap();
        checkpoints.push(projection(&repo));
        repo.move_task_within_list(&l1, &t1, Placement::After(t2.clone()))
            .await
            .unwrap();
        checkpoints.push(projection(&repo));
        repo.remove_task(&l1, &t2).await.unwrap();
        checkpoints.push(projection(&repo));

        let steps = checkpoints.len() - 1;
        for i in (0..steps).rev() {
            assert!(repo.undo().await.unwrap());
            assert_eq!(projection(&repo), checkpoints[i], "undo to checkpoint {i}");
        }
        assert!(!repo.undo().await.unwrap());

        for i in 1..=steps {
            assert!(repo.redo().await.unwrap());
            assert_eq!(projection(&repo), checkpoints[i], "redo to checkpoint {i}");
        }
        assert!(!repo.redo().await.unwrap());
    }

    #[tokio::test]
    async fn rapid_text_edits_collapse_into_one_undo_step() {
        let mut repo = fresh_repo("a").await;
        let list_id = repo.create_list("L").await.unwrap();
        let task_id = repo
            .insert_task(&list_id, task("h"), Placement::End)
            .await
            .unwrap();
        for text in ["he", "hel", "hell", "hello"] {
            repo.update_task(&list_id, &task_id, text_patch(text))
                .await
                .unwrap();
        }

        assert!(repo.undo().await.unwrap());
        let view = repo.list_view(&list_id).unwrap();
        assert_eq!(view.tasks[0].text, "h");

        assert!(repo.redo().await.unwrap());
        let view = repo.list_view(&list_id).unwrap();
        assert_eq!(view.tasks[0].text, "hello");
    }

    #[tokio::test]
    async fn move_between_lists_is_one_history_step() {
        let mut repo = fresh_repo("a").await;
        let l1 = repo.create_list("Source").await.unwrap();
        let l2 = repo.create_list("Target").await.unwrap();
        let t1 = repo
            .insert_task(&l1, task("wandering"), Placement::End)
            .await
            .unwrap();

        repo.move_task(&l1, &l2, &t1, Placement::End).await.unwrap();
        assert!(repo.list_view(&l1).unwrap().tasks.is_empty());
        assert_eq!(repo.list_view(&l2).unwrap().tasks[0].text, "wandering");
        // The task keeps its id across lists.
        assert_eq!(repo.list_view(&l2).unwrap().tasks[0].id, t1);

        assert!(repo.undo().await.unwrap());
        assert_eq!(repo.list_view(&l1).unwrap().tasks[0].text, "wandering");
        assert!(repo.list_view(&l2).unwrap().tasks.is_empty());

        assert!(repo.redo().await.unwrap());
        assert!(repo.list_view(&l1).unwrap().tasks.is_empty());
        assert_eq!(repo.list_view(&l2).unwrap().tasks[0].text, "wandering");
    }

    #[tokio::test]
    async fn undoing_remove_list_restores_content() {
        let mut repo = fresh_repo("a").await;
        let list_id = repo.create_list("Keep").await.unwrap();
        repo.insert_task(&list_id, task("one"), Placement::End)
            .await
            .unwrap();
        repo.insert_task(&list_id, task("two"), Placement::End)
            .await
            .unwrap();

        repo.remove_list(&list_id).await.unwrap();
        assert!(repo.lists().is_empty());

        assert!(repo.undo().await.unwrap());
        let lists = repo.lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].title, "Keep");
        let view = repo.list_view(&lists[0].id).unwrap();
        let texts: Vec<&str> = view.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn remote_ops_replicate_between_repositories() {
        let mut a = fresh_repo("actor-a").await;
        let l1 = a.create_list("Shared").await.unwrap();
        a.insert_task(&l1, task("alpha"), Placement::End)
            .await
            .unwrap();
        let t2 = a
            .insert_task(&l1, task("beta"), Placement::End)
            .await
            .unwrap();
        a.toggle_task(&l1, &t2).await.unwrap();

        let ops: Vec<Operation> = a
            .outbox_peek(100)
            .unwrap()
            .into_iter()
            .map(|entry| entry.op)
            .collect();

        let mut b = fresh_repo("actor-b").await;
        b.apply_remote_ops(&ops).await.unwrap();
        assert_eq!(projection(&a), projection(&b));
        // Remote application queues nothing for push and records no history.
        assert_eq!(b.outbox_len().unwrap(), 0);
        assert!(!b.can_undo());

        // Redelivery is harmless.
        b.apply_remote_ops(&ops).await.unwrap();
        assert_eq!(projection(&a), projection(&b));
    }

    #[tokio::test]
    async fn snapshot_replacement_installs_foreign_state() {
        let mut a = fresh_repo("actor-a").await;
        let l1 = a.create_list("Imported").await.unwrap();
        a.insert_task(&l1, task("payload"), Placement::End)
            .await
            .unwrap();
        let doc = a.export_snapshot_data();

        let mut b = fresh_repo("actor-b").await;
        let stale = b.create_list("Stale").await.unwrap();
        b.insert_task(&stale, task("gone"), Placement::End)
            .await
            .unwrap();

        b.replace_with_snapshot(&doc).await.unwrap();
        assert_eq!(projection(&a), projection(&b));
        assert!(!b.can_undo());
    }

    #[tokio::test]
    async fn hydration_reproduces_state_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        let expected;
        {
            let store = SqliteStateStore::open(&path).unwrap();
            let mut repo = Repository::hydrate(ActorId::new("a"), Box::new(store))
                .await
                .unwrap();
            let l1 = repo.create_list("Persisted").await.unwrap();
            for i in 0..40 {
                repo.insert_task(&l1, task(&format!("task {i}")), Placement::End)
                    .await
                    .unwrap();
            }
            let first_task = repo.list_view(&l1).unwrap().tasks[0].id.clone();
            repo.remove_task(&l1, &first_task).await.unwrap();
            expected = projection(&repo);
        }

        // The op volume crossed the snapshot threshold, so the store holds a
        // snapshot plus a short tail of ops.
        let store = SqliteStateStore::open(&path).unwrap();
        let records = store.load_lists().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].snapshot.is_some());
        assert!(records[0].ops.len() < 40);

        let repo = Repository::hydrate(ActorId::new("a"), Box::new(store))
            .await
            .unwrap();
        assert_eq!(projection(&repo), expected);
    }

    /// Store that fails every write, for advisory-error behaviour.
    struct FailingStore;

    impl StateStore for FailingStore {
        fn persist_registry_ops(
            &mut self,
            _ops: &[Operation],
            _snapshot: Option<&synclist_crdt::RegistryState>,
        ) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }

        fn load_registry(
            &self,
        ) -> StorageResult<(Option<synclist_crdt::RegistryState>, Vec<Operation>)> {
            Ok((None, Vec::new()))
        }

        fn persist_list_ops(
            &mut self,
            _list_id: &str,
            _ops: &[Operation],
            _snapshot: Option<&synclist_crdt::ListState>,
        ) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }

        fn load_lists(&self) -> StorageResult<Vec<ListRecord>> {
            Ok(Vec::new())
        }

        fn clear_state(&mut self) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }

        fn load_sync_state(&self) -> StorageResult<Option<SyncState>> {
            Ok(None)
        }

        fn save_sync_state(&mut self, _state: &SyncState) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }

        fn outbox_push(&mut self, _ops: &[Operation]) -> StorageResult<()> {
            Err(StorageError::Database("disk full".to_string()))
        }

        fn outbox_peek(&self, _limit: usize) -> StorageResult<Vec<OutboxEntry>> {
            Ok(Vec::new())
        }

        fn outbox_remove_through(&mut self, _seq: i64) -> StorageResult<()> {
            Ok(())
        }

        fn outbox_clear(&mut self) -> StorageResult<()> {
            Ok(())
        }

        fn outbox_len(&self) -> StorageResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn storage_failures_are_advisory() {
        let mut repo = Repository::hydrate(ActorId::new("a"), Box::new(FailingStore))
            .await
            .unwrap();
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        repo.set_storage_error_handler(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // The intent succeeds and state stays live despite the failing disk.
        let list_id = repo.create_list("Ephemeral").await.unwrap();
        repo.insert_task(&list_id, task("still here"), Placement::End)
            .await
            .unwrap();
        assert_eq!(repo.list_view(&list_id).unwrap().tasks.len(), 1);
        assert!(reported.load(Ordering::SeqCst) > 0);
    }
}
