//! The sync service: per-user op log and dataset generation store over
//! SQLite.
//!
//! All writes go through one connection behind an async mutex using
//! immediate transactions, which serialises concurrent writers. Reads use a
//! second connection with a busy timeout and may briefly observe an older
//! max sequence; ordering always comes from `server_seq`, never wall time.

use crate::ServerError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use synclist_protocol::{BootstrapResponse, PullResponse, PushRequest, PushResponse, SyncOp};
use tokio::sync::Mutex;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServerError>;

#[derive(Debug, Clone)]
struct Generation {
    id: i64,
    key: String,
    blob: String,
}

pub struct SyncService {
    write: Mutex<Connection>,
    read: Mutex<Connection>,
}

impl SyncService {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let write = Connection::open(&path)
            .map_err(|e| ServerError::Database(format!("failed to open server db: {e}")))?;
        write
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS snapshots (
                     dataset_generation_id INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id TEXT NOT NULL,
                     dataset_generation_key TEXT NOT NULL,
                     blob TEXT NOT NULL,
                     created_at TEXT NOT NULL,
                     UNIQUE (user_id, dataset_generation_key)
                 );
                 CREATE TABLE IF NOT EXISTS meta (
                     user_id TEXT PRIMARY KEY,
                     active_dataset_generation_id INTEGER NOT NULL,
                     updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS ops (
                     server_seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     user_id TEXT NOT NULL,
                     dataset_generation_id INTEGER NOT NULL,
                     scope TEXT NOT NULL,
                     resource_id TEXT NOT NULL,
                     actor TEXT NOT NULL,
                     clock INTEGER NOT NULL,
                     payload TEXT NOT NULL,
                     UNIQUE (user_id, dataset_generation_id, actor, clock, scope, resource_id)
                 );
                 CREATE INDEX IF NOT EXISTS ops_by_user_generation
                     ON ops (user_id, dataset_generation_id, server_seq);
                 CREATE TABLE IF NOT EXISTS clients (
                     user_id TEXT NOT NULL,
                     client_id TEXT NOT NULL,
                     last_seen_server_seq INTEGER NOT NULL,
                     updated_at TEXT NOT NULL,
                     PRIMARY KEY (user_id, client_id)
                 );",
            )
            .map_err(|e| ServerError::Database(format!("failed to create schema: {e}")))?;

        let read = Connection::open(&path)
            .map_err(|e| ServerError::Database(format!("failed to open read connection: {e}")))?;
        read.busy_timeout(std::time::Duration::from_millis(2000))
            .map_err(|e| ServerError::Database(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    fn active_generation(conn: &Connection, user_id: &str) -> ServiceResult<Option<Generation>> {
        Ok(conn
            .query_row(
                "SELECT s.dataset_generation_id, s.dataset_generation_key, s.blob
                 FROM meta m
                 JOIN snapshots s ON s.dataset_generation_id = m.active_dataset_generation_id
                 WHERE m.user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Generation {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        blob: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Active generation, installing an empty one on first contact.
    fn ensure_generation(conn: &Connection, user_id: &str) -> ServiceResult<Generation> {
        if let Some(generation) = Self::active_generation(conn, user_id)? {
            return Ok(generation);
        }
        let key = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO snapshots (user_id, dataset_generation_key, blob, created_at)
             VALUES (?1, ?2, '', ?3)",
            params![user_id, key, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT OR REPLACE INTO meta (user_id, active_dataset_generation_id, updated_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, id, now],
        )?;
        Ok(Generation {
            id,
            key,
            blob: String::new(),
        })
    }

    fn max_seq(conn: &Connection, user_id: &str, generation_id: i64) -> ServiceResult<i64> {
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(server_seq), 0) FROM ops
             WHERE user_id = ?1 AND dataset_generation_id = ?2",
            params![user_id, generation_id],
            |row| row.get(0),
        )?)
    }

    fn ops_since(
        conn: &Connection,
        user_id: &str,
        generation_id: i64,
        since: i64,
    ) -> ServiceResult<Vec<SyncOp>> {
        let mut stmt = conn.prepare(
            "SELECT server_seq, payload FROM ops
             WHERE user_id = ?1 AND dataset_generation_id = ?2 AND server_seq > ?3
             ORDER BY server_seq",
        )?;
        let rows = stmt.query_map(params![user_id, generation_id, since], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut ops = Vec::new();
        for row in rows {
            let (server_seq, payload) = row?;
            match serde_json::from_str(&payload) {
                Ok(op) => ops.push(SyncOp {
                    op,
                    server_seq: Some(server_seq),
                }),
                Err(e) => {
                    log::warn!("skipping malformed stored op at seq {server_seq}: {e}")
                }
            }
        }
        Ok(ops)
    }

    fn touch_client(
        conn: &Connection,
        user_id: &str,
        client_id: &str,
        seen_seq: i64,
    ) -> ServiceResult<()> {
        conn.execute(
            "INSERT INTO clients (user_id, client_id, last_seen_server_seq, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, client_id) DO UPDATE SET
                 last_seen_server_seq = MAX(last_seen_server_seq, excluded.last_seen_server_seq),
                 updated_at = excluded.updated_at",
            params![user_id, client_id, seen_seq, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Active snapshot plus every op of the active generation.
    pub async fn bootstrap(
        &self,
        user_id: &str,
        client_id: &str,
    ) -> ServiceResult<BootstrapResponse> {
        let mut conn = self.write.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let generation = Self::ensure_generation(&tx, user_id)?;
        let ops = Self::ops_since(&tx, user_id, generation.id, 0)?;
        let server_seq = Self::max_seq(&tx, user_id, generation.id)?;
        Self::touch_client(&tx, user_id, client_id, server_seq)?;
        tx.commit()?;
        Ok(BootstrapResponse {
            dataset_generation_key: generation.key,
            snapshot: generation.blob,
            ops,
            server_seq,
        })
    }

    /// Append pushed ops with dedupe and advance the client cursor.
    pub async fn push(&self, user_id: &str, request: &PushRequest) -> ServiceResult<PushResponse> {
        for op in &request.ops {
            op.op
                .validate()
                .map_err(|e| ServerError::InvalidOp(e.to_string()))?;
        }

        let mut conn = self.write.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let generation = Self::ensure_generation(&tx, user_id)?;
        if generation.key != request.dataset_generation_key {
            return Err(ServerError::GenerationMismatch(generation.key));
        }

        for op in &request.ops {
            let payload = serde_json::to_string(&op.op)
                .map_err(|e| ServerError::Database(format!("failed to encode op: {e}")))?;
            // Duplicate submissions are silently ignored by the unique key.
            tx.execute(
                "INSERT OR IGNORE INTO ops
                     (user_id, dataset_generation_id, scope, resource_id, actor, clock, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    generation.id,
                    op.op.scope.as_str(),
                    op.op.resource_id,
                    op.op.actor.as_str(),
                    op.op.clock as i64,
                    payload
                ],
            )?;
        }

        let server_seq = Self::max_seq(&tx, user_id, generation.id)?;
        Self::touch_client(&tx, user_id, &request.client_id, server_seq)?;
        tx.commit()?;
        Ok(PushResponse {
            server_seq,
            dataset_generation_key: generation.key,
        })
    }

    /// Ops past `since` for the active generation.
    pub async fn pull(
        &self,
        user_id: &str,
        _client_id: &str,
        since: i64,
        dataset_generation_key: &str,
    ) -> ServiceResult<PullResponse> {
        let generation = {
            let conn = self.read.lock().await;
            Self::active_generation(&conn, user_id)?
        };
        let generation = match generation {
            Some(generation) => generation,
            None => {
                // First contact through pull; install the initial generation.
                let conn = self.write.lock().await;
                Self::ensure_generation(&conn, user_id)?
            }
        };
        if generation.key != dataset_generation_key {
            return Err(ServerError::GenerationMismatch(generation.key));
        }

        let conn = self.read.lock().await;
        let ops = Self::ops_since(&conn, user_id, generation.id, since)?;
        let server_seq = Self::max_seq(&conn, user_id, generation.id)?.max(since);
        Ok(PullResponse {
            ops,
            server_seq,
            dataset_generation_key: generation.key,
        })
    }

    /// Install a new generation from a client snapshot. Re-posting the exact
    /// same key and blob is idempotent; the same key with different content
    /// is rejected. Success flips the active generation and invalidates the
    /// user's ops and client cursors.
    pub async fn reset(
        &self,
        user_id: &str,
        dataset_generation_key: &str,
        snapshot: &str,
    ) -> ServiceResult<()> {
        let mut conn = self.write.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT blob FROM snapshots
                 WHERE user_id = ?1 AND dataset_generation_key = ?2",
                params![user_id, dataset_generation_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(blob) = existing {
            if blob == snapshot {
                return Ok(());
            }
            return Err(ServerError::DuplicateKey);
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO snapshots (user_id, dataset_generation_key, blob, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, dataset_generation_key, snapshot, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT OR REPLACE INTO meta (user_id, active_dataset_generation_id, updated_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, id, now],
        )?;
        tx.execute("DELETE FROM ops WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM clients WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Cursor a client was last seen at, if any.
    pub async fn client_cursor(&self, user_id: &str, client_id: &str) -> ServiceResult<Option<i64>> {
        let conn = self.read.lock().await;
        Ok(conn
            .query_row(
                "SELECT last_seen_server_seq FROM clients
                 WHERE user_id = ?1 AND client_id = ?2",
                params![user_id, client_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synclist_common::ActorId;
    use synclist_crdt::{Placement, TaskData, TaskListCrdt};

    fn service() -> (tempfile::TempDir, SyncService) {
        let dir = tempfile::tempdir().unwrap();
        let svc = SyncService::open(dir.path().join("server.db")).unwrap();
        (dir, svc)
    }

    fn sample_ops(actor: &str, n: usize) -> Vec<SyncOp> {
        let mut list = TaskListCrdt::new(ActorId::new(actor), "l1");
        (0..n)
            .map(|i| {
                SyncOp::from(
                    list.insert_task(
                        Some(format!("{actor}-t{i}")),
                        TaskData {
                            text: format!("task {i}"),
                            ..TaskData::default()
                        },
                        &Placement::End,
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn bootstrap_installs_a_generation_lazily() {
        let (_dir, svc) = service();
        let first = svc.bootstrap("u1", "c1").await.unwrap();
        assert!(!first.dataset_generation_key.is_empty());
        assert!(first.snapshot.is_empty());
        assert_eq!(first.server_seq, 0);
        assert!(first.ops.is_empty());

        // Stable across calls and clients.
        let second = svc.bootstrap("u1", "c2").await.unwrap();
        assert_eq!(second.dataset_generation_key, first.dataset_generation_key);

        // Users are isolated.
        let other = svc.bootstrap("u2", "c1").await.unwrap();
        assert_ne!(other.dataset_generation_key, first.dataset_generation_key);
    }

    #[tokio::test]
    async fn push_assigns_ascending_seqs_and_dedupes() {
        let (_dir, svc) = service();
        let boot = svc.bootstrap("u1", "c1").await.unwrap();
        let ops = sample_ops("a", 3);
        let request = PushRequest {
            client_id: "c1".to_string(),
            dataset_generation_key: boot.dataset_generation_key.clone(),
            ops: ops.clone(),
        };

        let first = svc.push("u1", &request).await.unwrap();
        assert_eq!(first.server_seq, 3);

        // Re-pushing the identical batch adds no rows and still answers with
        // a valid, non-decreasing sequence.
        let second = svc.push("u1", &request).await.unwrap();
        assert_eq!(second.server_seq, 3);

        let pulled = svc
            .pull("u1", "c1", 0, &boot.dataset_generation_key)
            .await
            .unwrap();
        assert_eq!(pulled.ops.len(), 3);
        let seqs: Vec<i64> = pulled.ops.iter().filter_map(|op| op.server_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        assert_eq!(svc.client_cursor("u1", "c1").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn push_rejects_stale_generation_and_invalid_ops() {
        let (_dir, svc) = service();
        let boot = svc.bootstrap("u1", "c1").await.unwrap();

        let stale = PushRequest {
            client_id: "c1".to_string(),
            dataset_generation_key: "not-the-active-key".to_string(),
            ops: sample_ops("a", 1),
        };
        match svc.push("u1", &stale).await {
            Err(ServerError::GenerationMismatch(key)) => {
                assert_eq!(key, boot.dataset_generation_key)
            }
            other => panic!("unexpected: {other:?}"),
        }

        let mut bad = sample_ops("a", 1);
        bad[0].op.clock = 0;
        let invalid = PushRequest {
            client_id: "c1".to_string(),
            dataset_generation_key: boot.dataset_generation_key.clone(),
            ops: bad,
        };
        assert!(matches!(
            svc.push("u1", &invalid).await,
            Err(ServerError::InvalidOp(_))
        ));
    }

    #[tokio::test]
    async fn pull_filters_by_cursor_and_checks_generation() {
        let (_dir, svc) = service();
        let boot = svc.bootstrap("u1", "c1").await.unwrap();
        let request = PushRequest {
            client_id: "c1".to_string(),
            dataset_generation_key: boot.dataset_generation_key.clone(),
            ops: sample_ops("a", 5),
        };
        svc.push("u1", &request).await.unwrap();

        let tail = svc
            .pull("u1", "c2", 3, &boot.dataset_generation_key)
            .await
            .unwrap();
        assert_eq!(tail.ops.len(), 2);
        assert_eq!(tail.server_seq, 5);

        assert!(matches!(
            svc.pull("u1", "c2", 0, "other-key").await,
            Err(ServerError::GenerationMismatch(_))
        ));
    }

    #[tokio::test]
    async fn reset_flips_generation_and_hides_prior_ops() {
        let (_dir, svc) = service();
        let boot = svc.bootstrap("u1", "c1").await.unwrap();
        let request = PushRequest {
            client_id: "c1".to_string(),
            dataset_generation_key: boot.dataset_generation_key.clone(),
            ops: sample_ops("a", 4),
        };
        svc.push("u1", &request).await.unwrap();

        svc.reset("u1", "gen-2", "{\"snapshot\":true}").await.unwrap();

        // Old cursors and ops are invisible under the new generation.
        let fresh = svc.bootstrap("u1", "c1").await.unwrap();
        assert_eq!(fresh.dataset_generation_key, "gen-2");
        assert_eq!(fresh.snapshot, "{\"snapshot\":true}");
        assert!(fresh.ops.is_empty());
        assert_eq!(fresh.server_seq, 0);
        assert!(matches!(
            svc.pull("u1", "c1", 0, &boot.dataset_generation_key).await,
            Err(ServerError::GenerationMismatch(_))
        ));

        // Identical key and blob: idempotent.
        svc.reset("u1", "gen-2", "{\"snapshot\":true}").await.unwrap();
        // Same key, different blob: rejected.
        assert!(matches!(
            svc.reset("u1", "gen-2", "{\"snapshot\":false}").await,
            Err(ServerError::DuplicateKey)
        ));
    }
}
