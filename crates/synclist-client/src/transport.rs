//! Transport abstraction over the sync endpoints.
//!
//! The monitor talks to a [`SyncTransport`] so tests can substitute an
//! in-memory server; [`HttpTransport`] is the production implementation over
//! `reqwest`. Generation mismatches are data, not transport failures, so the
//! push/pull/reset calls return outcome enums instead of mapping 409 to an
//! error.

use crate::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use synclist_protocol::{
    BootstrapResponse, GenerationMismatch, PullResponse, PushRequest, PushResponse, ResetRequest,
};
use url::Url;

/// Result of a push: accepted or rejected for carrying a stale generation.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted(PushResponse),
    Mismatch(GenerationMismatch),
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Ops(PullResponse),
    Mismatch(GenerationMismatch),
}

/// Result of a snapshot reset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResetOutcome {
    Accepted,
    /// The key already exists for this user with different content.
    Rejected(String),
}

/// The sync server's HTTP surface, seen from the client.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn healthz(&self) -> SyncResult<()>;

    async fn bootstrap(&self, client_id: &str) -> SyncResult<BootstrapResponse>;

    async fn push(&self, request: &PushRequest) -> SyncResult<PushOutcome>;

    async fn pull(
        &self,
        client_id: &str,
        since: i64,
        dataset_generation_key: &str,
    ) -> SyncResult<PullOutcome>;

    async fn reset(&self, request: &ResetRequest) -> SyncResult<ResetOutcome>;
}

/// Production transport over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> SyncResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| SyncError::Network(format!("invalid base url: {e}")))?;
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
        })
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> SyncResult<Self> {
        let mut transport = Self::new(base_url)?;
        transport.http = http;
        Ok(transport)
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Network(format!("invalid endpoint {path}: {e}")))
    }
}

fn network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

async fn mismatch_body(response: reqwest::Response) -> SyncResult<GenerationMismatch> {
    response
        .json::<GenerationMismatch>()
        .await
        .map_err(|e| SyncError::Decode(format!("mismatch body: {e}")))
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn healthz(&self) -> SyncResult<()> {
        let url = self.endpoint("/healthz")?;
        let response = self.http.get(url).send().await.map_err(network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Network(format!(
                "healthz returned {}",
                response.status()
            )))
        }
    }

    async fn bootstrap(&self, client_id: &str) -> SyncResult<BootstrapResponse> {
        let mut url = self.endpoint("/sync/bootstrap")?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        let response = self.http.get(url).send().await.map_err(network)?;
        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "bootstrap returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Decode(format!("bootstrap body: {e}")))
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushOutcome> {
        let url = self.endpoint("/sync/push")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(network)?;
        match response.status() {
            StatusCode::CONFLICT => Ok(PushOutcome::Mismatch(mismatch_body(response).await?)),
            status if status.is_success() => {
                let body = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Decode(format!("push body: {e}")))?;
                Ok(PushOutcome::Accepted(body))
            }
            status => Err(SyncError::Network(format!("push returned {status}"))),
        }
    }

    async fn pull(
        &self,
        client_id: &str,
        since: i64,
        dataset_generation_key: &str,
    ) -> SyncResult<PullOutcome> {
        let mut url = self.endpoint("/sync/pull")?;
        url.query_pairs_mut()
            .append_pair("clientId", client_id)
            .append_pair("since", &since.to_string())
            .append_pair("datasetGenerationKey", dataset_generation_key);
        let response = self.http.get(url).send().await.map_err(network)?;
        match response.status() {
            StatusCode::CONFLICT => Ok(PullOutcome::Mismatch(mismatch_body(response).await?)),
            status if status.is_success() => {
                let body = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Decode(format!("pull body: {e}")))?;
                Ok(PullOutcome::Ops(body))
            }
            status => Err(SyncError::Network(format!("pull returned {status}"))),
        }
    }

    async fn reset(&self, request: &ResetRequest) -> SyncResult<ResetOutcome> {
        let url = self.endpoint("/sync/reset")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(network)?;
        match response.status() {
            StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                Ok(ResetOutcome::Rejected(body))
            }
            status if status.is_success() => Ok(ResetOutcome::Accepted),
            status => Err(SyncError::Network(format!("reset returned {status}"))),
        }
    }
}
