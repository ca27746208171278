//! SQLite-backed client store.
//!
//! One database file holds every object store. Ops are stored as JSON rows
//! keyed by `(resource, clock, actor)`; snapshots are single JSON rows per
//! resource. A snapshot write and the pruning of the ops it covers happen in
//! the same transaction as the op appends, so hydration never sees a
//! half-applied state.

use crate::{ListRecord, OutboxEntry, StateStore, StorageError, StorageResult, SyncState};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use synclist_crdt::{ListState, Operation, RegistryState};

const SCHEMA_VERSION: i32 = 1;

#[derive(Debug)]
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Database(format!("failed to open client db: {e}")))?;
        Self::from_connection(conn)
    }

    /// Volatile store for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Database(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> StorageResult<()> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }
        self.conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS registry_snapshot (
                 id INTEGER PRIMARY KEY CHECK (id = 0),
                 state TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS registry_ops (
                 clock INTEGER NOT NULL,
                 actor TEXT NOT NULL,
                 op TEXT NOT NULL,
                 PRIMARY KEY (clock, actor)
             );
             CREATE TABLE IF NOT EXISTS list_snapshots (
                 list_id TEXT PRIMARY KEY,
                 state TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS list_ops (
                 list_id TEXT NOT NULL,
                 clock INTEGER NOT NULL,
                 actor TEXT NOT NULL,
                 op TEXT NOT NULL,
                 PRIMARY KEY (list_id, clock, actor)
             );
             CREATE TABLE IF NOT EXISTS sync_state (
                 id INTEGER PRIMARY KEY CHECK (id = 0),
                 client_id TEXT NOT NULL,
                 last_server_seq INTEGER NOT NULL,
                 generation_key TEXT
             );
             CREATE TABLE IF NOT EXISTS outbox (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 op TEXT NOT NULL
             );
             PRAGMA user_version = 1;
             COMMIT;",
        )?;
        Ok(())
    }

    fn decode_op(raw: &str, context: &str) -> Option<Operation> {
        match serde_json::from_str(raw) {
            Ok(op) => Some(op),
            Err(e) => {
                log::warn!("skipping malformed stored op ({context}): {e}");
                None
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_op_for_test(&mut self, list_id: &str, clock: u64) {
        self.conn
            .execute(
                "UPDATE list_ops SET op = 'not json' WHERE list_id = ?1 AND clock = ?2",
                params![list_id, clock as i64],
            )
            .unwrap();
    }
}

impl StateStore for SqliteStateStore {
    fn persist_registry_ops(
        &mut self,
        ops: &[Operation],
        snapshot: Option<&RegistryState>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for op in ops {
            let encoded = serde_json::to_string(op)?;
            tx.execute(
                "INSERT INTO registry_ops (clock, actor, op) VALUES (?1, ?2, ?3)",
                params![op.clock as i64, op.actor.as_str(), encoded],
            )?;
        }
        if let Some(state) = snapshot {
            let encoded = serde_json::to_string(state)?;
            tx.execute(
                "INSERT OR REPLACE INTO registry_snapshot (id, state) VALUES (0, ?1)",
                params![encoded],
            )?;
            tx.execute(
                "DELETE FROM registry_ops WHERE clock <= ?1",
                params![state.clock as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_registry(&self) -> StorageResult<(Option<RegistryState>, Vec<Operation>)> {
        let snapshot: Option<String> = self
            .conn
            .query_row("SELECT state FROM registry_snapshot WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        let snapshot = snapshot.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("skipping malformed registry snapshot: {e}");
                None
            }
        });

        let mut stmt = self
            .conn
            .prepare("SELECT op FROM registry_ops ORDER BY clock, actor")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ops = Vec::new();
        for raw in rows {
            if let Some(op) = Self::decode_op(&raw?, "registry") {
                ops.push(op);
            }
        }
        Ok((snapshot, ops))
    }

    fn persist_list_ops(
        &mut self,
        list_id: &str,
        ops: &[Operation],
        snapshot: Option<&ListState>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for op in ops {
            let encoded = serde_json::to_string(op)?;
            tx.execute(
                "INSERT INTO list_ops (list_id, clock, actor, op) VALUES (?1, ?2, ?3, ?4)",
                params![list_id, op.clock as i64, op.actor.as_str(), encoded],
            )?;
        }
        if let Some(state) = snapshot {
            let encoded = serde_json::to_string(state)?;
            tx.execute(
                "INSERT OR REPLACE INTO list_snapshots (list_id, state) VALUES (?1, ?2)",
                params![list_id, encoded],
            )?;
            tx.execute(
                "DELETE FROM list_ops WHERE list_id = ?1 AND clock <= ?2",
                params![list_id, state.clock as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_lists(&self) -> StorageResult<Vec<ListRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT list_id FROM list_snapshots
             UNION SELECT DISTINCT list_id FROM list_ops
             ORDER BY list_id",
        )?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut records = Vec::with_capacity(ids.len());
        for list_id in ids {
            let snapshot: Option<String> = self
                .conn
                .query_row(
                    "SELECT state FROM list_snapshots WHERE list_id = ?1",
                    params![&list_id],
                    |row| row.get(0),
                )
                .optional()?;
            let snapshot = snapshot.and_then(|raw| match serde_json::from_str(&raw) {
                Ok(state) => Some(state),
                Err(e) => {
                    log::warn!("skipping malformed snapshot for list {list_id}: {e}");
                    None
                }
            });

            let mut stmt = self.conn.prepare(
                "SELECT op FROM list_ops WHERE list_id = ?1 ORDER BY clock, actor",
            )?;
            let rows = stmt.query_map(params![&list_id], |row| row.get::<_, String>(0))?;
            let mut ops = Vec::new();
            for raw in rows {
                if let Some(op) = Self::decode_op(&raw?, &list_id) {
                    ops.push(op);
                }
            }
            records.push(ListRecord {
                list_id,
                snapshot,
                ops,
            });
        }
        Ok(records)
    }

    fn clear_state(&mut self) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM registry_snapshot", [])?;
        tx.execute("DELETE FROM registry_ops", [])?;
        tx.execute("DELETE FROM list_snapshots", [])?;
        tx.execute("DELETE FROM list_ops", [])?;
        tx.commit()?;
        Ok(())
    }

    fn load_sync_state(&self) -> StorageResult<Option<SyncState>> {
        Ok(self
            .conn
            .query_row(
                "SELECT client_id, last_server_seq, generation_key FROM sync_state WHERE id = 0",
                [],
                |row| {
                    Ok(SyncState {
                        client_id: row.get(0)?,
                        last_server_seq: row.get(1)?,
                        dataset_generation_key: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn save_sync_state(&mut self, state: &SyncState) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (id, client_id, last_server_seq, generation_key)
             VALUES (0, ?1, ?2, ?3)",
            params![
                state.client_id,
                state.last_server_seq,
                state.dataset_generation_key
            ],
        )?;
        Ok(())
    }

    fn outbox_push(&mut self, ops: &[Operation]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for op in ops {
            let encoded = serde_json::to_string(op)?;
            tx.execute("INSERT INTO outbox (op) VALUES (?1)", params![encoded])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn outbox_peek(&self, limit: usize) -> StorageResult<Vec<OutboxEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, op FROM outbox ORDER BY seq LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (seq, raw) = row?;
            if let Some(op) = Self::decode_op(&raw, "outbox") {
                entries.push(OutboxEntry { seq, op });
            }
        }
        Ok(entries)
    }

    fn outbox_remove_through(&mut self, seq: i64) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM outbox WHERE seq <= ?1", params![seq])?;
        Ok(())
    }

    fn outbox_clear(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM outbox", [])?;
        Ok(())
    }

    fn outbox_len(&self) -> StorageResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
