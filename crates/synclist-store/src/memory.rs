//! In-memory client store, behaviourally equivalent to the SQLite backend.
//! Volatile; used by tests and tooling.

use crate::{ListRecord, OutboxEntry, StateStore, StorageResult, SyncState};
use std::collections::BTreeMap;
use synclist_crdt::{ListState, Operation, RegistryState};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    registry_snapshot: Option<RegistryState>,
    registry_ops: BTreeMap<(u64, String), Operation>,
    list_snapshots: BTreeMap<String, ListState>,
    list_ops: BTreeMap<(String, u64, String), Operation>,
    sync_state: Option<SyncState>,
    outbox: Vec<OutboxEntry>,
    outbox_next_seq: i64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            outbox_next_seq: 1,
            ..Self::default()
        }
    }
}

impl StateStore for MemoryStateStore {
    fn persist_registry_ops(
        &mut self,
        ops: &[Operation],
        snapshot: Option<&RegistryState>,
    ) -> StorageResult<()> {
        for op in ops {
            self.registry_ops
                .insert((op.clock, op.actor.to_string()), op.clone());
        }
        if let Some(state) = snapshot {
            self.registry_snapshot = Some(state.clone());
            self.registry_ops.retain(|(clock, _), _| *clock > state.clock);
        }
        Ok(())
    }

    fn load_registry(&self) -> StorageResult<(Option<RegistryState>, Vec<Operation>)> {
        Ok((
            self.registry_snapshot.clone(),
            self.registry_ops.values().cloned().collect(),
        ))
    }

    fn persist_list_ops(
        &mut self,
        list_id: &str,
        ops: &[Operation],
        snapshot: Option<&ListState>,
    ) -> StorageResult<()> {
        for op in ops {
            self.list_ops.insert(
                (list_id.to_string(), op.clock, op.actor.to_string()),
                op.clone(),
            );
        }
        if let Some(state) = snapshot {
            self.list_snapshots
                .insert(list_id.to_string(), state.clone());
            self.list_ops
                .retain(|(id, clock, _), _| id != list_id || *clock > state.clock);
        }
        Ok(())
    }

    fn load_lists(&self) -> StorageResult<Vec<ListRecord>> {
        let mut ids: Vec<String> = self.list_snapshots.keys().cloned().collect();
        for (id, _, _) in self.list_ops.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|list_id| ListRecord {
                snapshot: self.list_snapshots.get(&list_id).cloned(),
                ops: self
                    .list_ops
                    .iter()
                    .filter(|((id, _, _), _)| *id == list_id)
                    .map(|(_, op)| op.clone())
                    .collect(),
                list_id,
            })
            .collect())
    }

    fn clear_state(&mut self) -> StorageResult<()> {
        self.registry_snapshot = None;
        self.registry_ops.clear();
        self.list_snapshots.clear();
        self.list_ops.clear();
        Ok(())
    }

    fn load_sync_state(&self) -> StorageResult<Option<SyncState>> {
        Ok(self.sync_state.clone())
    }

    fn save_sync_state(&mut self, state: &SyncState) -> StorageResult<()> {
        self.sync_state = Some(state.clone());
        Ok(())
    }

    fn outbox_push(&mut self, ops: &[Operation]) -> StorageResult<()> {
        for op in ops {
            let seq = self.outbox_next_seq;
            self.outbox_next_seq += 1;
            self.outbox.push(OutboxEntry {
                seq,
                op: op.clone(),
            });
        }
        Ok(())
    }

    fn outbox_peek(&self, limit: usize) -> StorageResult<Vec<OutboxEntry>> {
        Ok(self.outbox.iter().take(limit).cloned().collect())
    }

    fn outbox_remove_through(&mut self, seq: i64) -> StorageResult<()> {
        self.outbox.retain(|entry| entry.seq > seq);
        Ok(())
    }

    fn outbox_clear(&mut self) -> StorageResult<()> {
        self.outbox.clear();
        Ok(())
    }

    fn outbox_len(&self) -> StorageResult<usize> {
        Ok(self.outbox.len())
    }
}
