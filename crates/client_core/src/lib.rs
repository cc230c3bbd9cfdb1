use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::WellId,
    error::ErrorCode,
    order::StageOrder,
    protocol::{Ack, Envelope, ErrorBody, ReorderRequest, StageSummary},
};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub mod controller;
pub mod session;

pub use controller::{
    ReorderCommand, ReorderController, ReorderPhase, RowBounds, SaveIndicator,
    SAVED_INDICATOR_TTL,
};
pub use session::{ReorderSession, SessionEvent};

/// Shown when the server could not be reached or answered with something
/// other than the JSON envelope.
pub const UNREACHABLE_MESSAGE: &str = "could not reach the server; the stage order was not saved";

#[derive(Debug, Error)]
pub enum ReorderClientError {
    #[error("{message}")]
    Rejected {
        status: u16,
        code: ErrorCode,
        message: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },
}

impl ReorderClientError {
    /// Text suitable for the inline error next to the stage list.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } => message.clone(),
            Self::Transport(_) | Self::InvalidServerUrl { .. } => UNREACHABLE_MESSAGE.to_string(),
        }
    }

    /// The server rejected the order because the client's view is stale.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: ErrorCode::Conflict,
                ..
            }
        )
    }
}

/// Server operations the reorder session depends on.
#[async_trait]
pub trait StageOrderApi: Send + Sync {
    async fn list_stages(&self, well_id: WellId) -> Result<Vec<StageSummary>, ReorderClientError>;
    async fn save_order(&self, well_id: WellId, order: &StageOrder)
        -> Result<(), ReorderClientError>;
}

#[derive(Clone)]
pub struct StageClient {
    http: Client,
    server_url: String,
}

impl StageClient {
    pub fn new(server_url: &str) -> Result<Self, ReorderClientError> {
        let parsed =
            Url::parse(server_url).map_err(|source| ReorderClientError::InvalidServerUrl {
                url: server_url.to_string(),
                source,
            })?;
        Ok(Self {
            http: Client::new(),
            server_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn stages_url(&self, well_id: WellId) -> String {
        format!("{}/api/operativo/wells/{}/stages", self.server_url, well_id.0)
    }
}

#[async_trait]
impl StageOrderApi for StageClient {
    async fn list_stages(&self, well_id: WellId) -> Result<Vec<StageSummary>, ReorderClientError> {
        let response = self.http.get(self.stages_url(well_id)).send().await?;
        let response = reject_failure(response).await?;
        let body: Envelope<Vec<StageSummary>> = response.json().await?;
        Ok(body.data)
    }

    async fn save_order(
        &self,
        well_id: WellId,
        order: &StageOrder,
    ) -> Result<(), ReorderClientError> {
        let response = self
            .http
            .post(format!("{}/reorder", self.stages_url(well_id)))
            .json(&ReorderRequest::from_order(order))
            .send()
            .await?;
        let response = reject_failure(response).await?;
        let ack: Ack = response.json().await?;
        if !ack.ok {
            return Err(ReorderClientError::Rejected {
                status: StatusCode::OK.as_u16(),
                code: ErrorCode::Internal,
                message: "server did not acknowledge the stage order".to_string(),
            });
        }
        info!(well_id = well_id.0, stages = order.len(), "stage order saved");
        Ok(())
    }
}

/// Turns a non-success response into [`ReorderClientError::Rejected`], using the
/// server's error envelope when it sent one.
async fn reject_failure(response: Response) -> Result<Response, ReorderClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let bytes = response.bytes().await?;
    let (code, message) = match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => (body.code, body.error),
        Err(_) => (code_for_status(status), UNREACHABLE_MESSAGE.to_string()),
    };
    warn!(status = status.as_u16(), ?code, %message, "server rejected request");
    Err(ReorderClientError::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::Validation,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
