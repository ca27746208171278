//! # synclist server crate
//!
//! The HTTP sync server: serialises each user's operations into a per-user
//! log scoped by dataset generation, serves bootstrap snapshots, and handles
//! generation resets. Authentication is an external collaborator; user
//! identity is taken from the `x-user-id` header with a single-user default.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use synclist_protocol::{GenerationMismatch, PushRequest, ResetRequest};

pub mod config;
pub mod service;

pub use config::ServerConfig;
pub use service::SyncService;

/// User id applied when the header is absent (single-user deployments).
pub const DEFAULT_USER_ID: &str = "local";

const USER_HEADER: &str = "x-user-id";

/// Errors raised by the sync service and mapped onto HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    /// Carries the active key so clients can re-bootstrap.
    #[error("dataset generation mismatch; active key is {0}")]
    GenerationMismatch(String),

    #[error("dataset generation key already exists")]
    DuplicateKey,
}

impl From<rusqlite::Error> for ServerError {
    fn from(e: rusqlite::Error) -> Self {
        ServerError::Database(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::GenerationMismatch(key) => (
                StatusCode::CONFLICT,
                Json(GenerationMismatch {
                    dataset_generation_key: key,
                }),
            )
                .into_response(),
            ServerError::DuplicateKey => {
                (StatusCode::CONFLICT, "dataset generation key already exists").into_response()
            }
            ServerError::InvalidOp(message) => {
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            ServerError::Database(message) => {
                log::error!("database failure: {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, "database failure").into_response()
            }
        }
    }
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_USER_ID)
        .to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapParams {
    client_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullParams {
    client_id: String,
    since: i64,
    dataset_generation_key: String,
}

/// Build the HTTP surface over a shared [`SyncService`].
pub fn app_router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/sync/bootstrap", get(bootstrap_handler))
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
        .route("/sync/reset", post(reset_handler))
        .with_state(service)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn bootstrap_handler(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    Query(params): Query<BootstrapParams>,
) -> Result<impl IntoResponse, ServerError> {
    let user = user_id(&headers);
    let response = service.bootstrap(&user, &params.client_id).await?;
    Ok(Json(response))
}

async fn push_handler(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let user = user_id(&headers);
    let response = service.push(&user, &request).await?;
    Ok(Json(response))
}

async fn pull_handler(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    Query(params): Query<PullParams>,
) -> Result<impl IntoResponse, ServerError> {
    let user = user_id(&headers);
    let response = service
        .pull(
            &user,
            &params.client_id,
            params.since,
            &params.dataset_generation_key,
        )
        .await?;
    Ok(Json(response))
}

async fn reset_handler(
    State(service): State<Arc<SyncService>>,
    headers: HeaderMap,
    Json(request): Json<ResetRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let user = user_id(&headers);
    service
        .reset(&user, &request.dataset_generation_key, &request.snapshot)
        .await?;
    Ok(StatusCode::OK)
}
