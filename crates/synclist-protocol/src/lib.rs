//! # synclist protocol crate
//!
//! The JSON bodies exchanged between sync clients and the sync server, plus
//! the client-produced snapshot document the server stores verbatim. The
//! server never looks inside a snapshot; clients never see another client's
//! ids except through operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synclist_crdt::{ListState, Operation, RegistryState};

/// Schema tag carried by every snapshot document.
pub const SNAPSHOT_SCHEMA: &str = "net.aggregat4.tasklist.snapshot@v1";

/// Errors raised when decoding wire or snapshot payloads.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot schema: {0}")]
    UnsupportedSchema(String),
}

/// One operation as it travels through the sync endpoints. `serverSeq` is
/// present only on server-to-client responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOp {
    #[serde(flatten)]
    pub op: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
}

impl From<Operation> for SyncOp {
    fn from(op: Operation) -> Self {
        SyncOp {
            op,
            server_seq: None,
        }
    }
}

/// `GET /sync/bootstrap` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub dataset_generation_key: String,
    /// Opaque snapshot blob; empty when the generation has no snapshot yet.
    pub snapshot: String,
    pub ops: Vec<SyncOp>,
    pub server_seq: i64,
}

/// `POST /sync/push` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub dataset_generation_key: String,
    pub ops: Vec<SyncOp>,
}

/// `POST /sync/push` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub server_seq: i64,
    pub dataset_generation_key: String,
}

/// Body of a 409 generation-mismatch response; carries the active key so the
/// client can re-bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMismatch {
    pub dataset_generation_key: String,
}

/// `GET /sync/pull` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub ops: Vec<SyncOp>,
    pub server_seq: i64,
    pub dataset_generation_key: String,
}

/// `POST /sync/reset` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub client_id: String,
    pub dataset_generation_key: String,
    pub snapshot: String,
}

/// Client-produced snapshot of all replicated state, stored verbatim by the
/// server under one dataset generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    pub schema: String,
    pub exported_at: DateTime<Utc>,
    pub data: SnapshotData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub registry: RegistryState,
    pub lists: Vec<ListSnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshotEntry {
    pub list_id: String,
    pub state: ListState,
}

impl SnapshotDocument {
    pub fn new(exported_at: DateTime<Utc>, data: SnapshotData) -> Self {
        SnapshotDocument {
            schema: SNAPSHOT_SCHEMA.to_string(),
            exported_at,
            data,
        }
    }

    /// Serialise to the opaque string form shipped to the server.
    pub fn encode(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an opaque snapshot blob, checking the schema tag.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let doc: SnapshotDocument = serde_json::from_str(raw)?;
        if doc.schema != SNAPSHOT_SCHEMA {
            return Err(DecodeError::UnsupportedSchema(doc.schema));
        }
        Ok(doc)
    }
}
