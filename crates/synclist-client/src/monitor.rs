//! The sync monitor: lifecycle, bootstrap, push/pull loops and snapshot
//! publication.
//!
//! The monitor shares the repository behind an async mutex (the client core
//! is single-threaded and cooperative; the mutex serialises sync work with
//! user intents). One spawned task runs the whole lifecycle: probe, bootstrap,
//! then push/pull until cancelled, backing off while the server is
//! unreachable and re-bootstrapping on generation mismatches.

use crate::backoff::Backoff;
use crate::transport::{PushOutcome, PullOutcome, ResetOutcome, SyncTransport};
use crate::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use synclist_common::new_id;
use synclist_crdt::Operation;
use synclist_protocol::{PushRequest, ResetRequest, SnapshotDocument, SyncOp};
use synclist_repo::Repository;
use synclist_store::SyncState;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Disabled,
    Connecting,
    Connected,
    BackingOff,
}

/// Tunables for the sync loops.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the pull loop runs when nothing else wakes it.
    pub pull_interval: Duration,
    /// Maximum ops per push request.
    pub push_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(5),
            push_batch: 64,
        }
    }
}

/// Drives synchronisation between one repository and the sync server.
pub struct SyncMonitor<T: SyncTransport> {
    repo: Arc<Mutex<Repository>>,
    transport: Arc<T>,
    config: SyncConfig,
    status_tx: watch::Sender<SyncStatus>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl<T: SyncTransport> Clone for SyncMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            status_tx: self.status_tx.clone(),
            cancel: self.cancel.clone(),
            wake: self.wake.clone(),
        }
    }
}

impl<T: SyncTransport + 'static> SyncMonitor<T> {
    pub fn new(repo: Arc<Mutex<Repository>>, transport: T, config: SyncConfig) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Disabled);
        Self {
            repo,
            transport: Arc::new(transport),
            config,
            status_tx,
            cancel: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to connection-state changes.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Wake the push loop after a local mutation.
    pub fn notify_local_change(&self) {
        self.wake.notify_one();
    }

    /// Start the sync lifecycle; runs until [`disable`](Self::disable).
    pub fn enable(&self) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run().await;
            monitor.set_status(SyncStatus::Disabled);
        })
    }

    /// Cancel all sync work. The outbox is preserved.
    pub fn disable(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        let mut backoff = Backoff::default();
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.set_status(SyncStatus::Connecting);

            let connected = match self.connect().await {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("sync connect failed: {e}");
                    false
                }
            };
            if !connected {
                self.set_status(SyncStatus::BackingOff);
                if self.sleep_cancellable(backoff.next_delay()).await {
                    return;
                }
                continue;
            }

            backoff.reset();
            self.set_status(SyncStatus::Connected);

            match self.connected_loop().await {
                Ok(()) => return, // cancelled
                Err(SyncError::GenerationMismatch(key)) => {
                    log::info!("dataset generation changed to {key}; re-bootstrapping");
                    continue;
                }
                Err(e) => {
                    log::debug!("sync loop error: {e}");
                    self.set_status(SyncStatus::BackingOff);
                    if self.sleep_cancellable(backoff.next_delay()).await {
                        return;
                    }
                }
            }
        }
    }

    async fn connect(&self) -> SyncResult<()> {
        self.transport.healthz().await?;
        self.bootstrap().await
    }

    /// Push and pull until cancellation or an error that needs the outer
    /// loop (backoff or re-bootstrap).
    async fn connected_loop(&self) -> SyncResult<()> {
        loop {
            self.drain_outbox().await?;
            self.pull_once().await?;

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.pull_interval) => {}
            }
        }
    }

    /// True when cancelled during the sleep.
    async fn sleep_cancellable(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn set_status(&self, status: SyncStatus) {
        self.status_tx.send_replace(status);
    }

    /// Load the persistent sync state, creating the client id on first use.
    pub async fn sync_state(&self) -> SyncResult<SyncState> {
        let mut repo = self.repo.lock().await;
        if let Some(state) = repo.load_sync_state()? {
            return Ok(state);
        }
        let state = SyncState {
            client_id: new_id(),
            last_server_seq: 0,
            dataset_generation_key: None,
        };
        repo.save_sync_state(&state)?;
        Ok(state)
    }

    /// Fetch the active generation and converge on it. A changed generation
    /// with a snapshot replaces local state wholesale; a changed generation
    /// without one (first contact with a fresh server) only adopts the key so
    /// local offline work survives and pushes up.
    pub async fn bootstrap(&self) -> SyncResult<()> {
        let state = self.sync_state().await?;
        let response = self.transport.bootstrap(&state.client_id).await?;
        let ops: Vec<Operation> = response.ops.iter().map(|s| s.op.clone()).collect();

        let mut repo = self.repo.lock().await;
        let same_generation =
            state.dataset_generation_key.as_deref() == Some(response.dataset_generation_key.as_str());

        if !same_generation && !response.snapshot.is_empty() {
            let doc = SnapshotDocument::decode(&response.snapshot)
                .map_err(|e| SyncError::Decode(e.to_string()))?;
            repo.replace_with_snapshot(&doc).await?;
            repo.outbox_clear()?;
        }

        repo.apply_remote_ops(&ops).await?;

        let cursor = if same_generation {
            state.last_server_seq.max(response.server_seq)
        } else {
            response.server_seq
        };
        repo.save_sync_state(&SyncState {
            client_id: state.client_id,
            last_server_seq: cursor,
            dataset_generation_key: Some(response.dataset_generation_key),
        })?;
        Ok(())
    }

    /// Push queued ops in submission order until the outbox is empty. On a
    /// generation mismatch the outbox is discarded and the caller
    /// re-bootstraps. A push response whose sequence jumps past our own ops
    /// is the hint that foreign ops landed in between; pull from the
    /// pre-push cursor before continuing (re-applied own ops are idempotent).
    pub async fn drain_outbox(&self) -> SyncResult<()> {
        loop {
            let (state, batch) = {
                let repo = self.repo.lock().await;
                let state = match repo.load_sync_state()? {
                    Some(state) => state,
                    None => return Ok(()),
                };
                (state, repo.outbox_peek(self.config.push_batch)?)
            };
            if batch.is_empty() {
                return Ok(());
            }
            let Some(key) = state.dataset_generation_key.clone() else {
                // Not bootstrapped yet; nothing to push against.
                return Ok(());
            };

            let last_seq = batch.last().map(|entry| entry.seq).unwrap_or(0);
            let request = PushRequest {
                client_id: state.client_id.clone(),
                dataset_generation_key: key,
                ops: batch
                    .iter()
                    .map(|entry| SyncOp::from(entry.op.clone()))
                    .collect(),
            };
            let pushed = request.ops.len() as i64;

            match self.transport.push(&request).await? {
                PushOutcome::Accepted(response) => {
                    let pre_push_cursor = state.last_server_seq;
                    {
                        let mut repo = self.repo.lock().await;
                        repo.outbox_remove_through(last_seq)?;
                        repo.save_sync_state(&SyncState {
                            client_id: state.client_id.clone(),
                            last_server_seq: pre_push_cursor.max(response.server_seq),
                            dataset_generation_key: Some(response.dataset_generation_key),
                        })?;
                    }
                    if response.server_seq > pre_push_cursor + pushed {
                        self.pull_from(pre_push_cursor).await?;
                    }
                }
                PushOutcome::Mismatch(mismatch) => {
                    let mut repo = self.repo.lock().await;
                    repo.outbox_clear()?;
                    return Err(SyncError::GenerationMismatch(
                        mismatch.dataset_generation_key,
                    ));
                }
            }
        }
    }

    /// Pull ops past the cursor and apply them.
    pub async fn pull_once(&self) -> SyncResult<()> {
        let state = self.sync_state().await?;
        self.pull_from(state.last_server_seq).await
    }

    async fn pull_from(&self, since: i64) -> SyncResult<()> {
        let state = self.sync_state().await?;
        let Some(key) = state.dataset_generation_key.clone() else {
            return Ok(());
        };

        match self.transport.pull(&state.client_id, since, &key).await? {
            PullOutcome::Ops(response) => {
                let ops: Vec<Operation> = response.ops.iter().map(|s| s.op.clone()).collect();
                let mut repo = self.repo.lock().await;
                repo.apply_remote_ops(&ops).await?;
                repo.save_sync_state(&SyncState {
                    client_id: state.client_id,
                    last_server_seq: state.last_server_seq.max(response.server_seq),
                    dataset_generation_key: Some(response.dataset_generation_key),
                })?;
                Ok(())
            }
            PullOutcome::Mismatch(mismatch) => Err(SyncError::GenerationMismatch(
                mismatch.dataset_generation_key,
            )),
        }
    }

    /// Publish the local state as a new dataset generation (import/reset).
    /// On success the outbox and cursor are cleared and the new key adopted;
    /// a duplicate key surfaces as [`SyncError::Publish`].
    pub async fn publish_snapshot(&self) -> SyncResult<String> {
        let state = self.sync_state().await?;
        let snapshot = {
            let repo = self.repo.lock().await;
            repo.export_snapshot_data()
                .encode()
                .map_err(|e| SyncError::Decode(e.to_string()))?
        };
        let key = new_id();
        let request = ResetRequest {
            client_id: state.client_id.clone(),
            dataset_generation_key: key.clone(),
            snapshot,
        };
        match self.transport.reset(&request).await? {
            ResetOutcome::Accepted => {
                let mut repo = self.repo.lock().await;
                repo.outbox_clear()?;
                repo.save_sync_state(&SyncState {
                    client_id: state.client_id,
                    last_server_seq: 0,
                    dataset_generation_key: Some(key.clone()),
                })?;
                Ok(key)
            }
            ResetOutcome::Rejected(body) => Err(SyncError::Publish(body)),
        }
    }
}
