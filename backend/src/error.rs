//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Everything that can go wrong while serving a chat stream.
///
/// `ReadTimeout` and `MalformedChunk` are recovered inside the relay loop and
/// never reach a client; they exist so the loop can log them uniformly.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected the request: status={status}, body={snippet}")]
    UpstreamRejected { status: u16, snippet: String },

    #[error("Upstream timed out after {0} seconds")]
    UpstreamTimeout(u64),

    #[error("Request canceled")]
    UpstreamCanceled,

    #[error("Upstream read timed out after {0} seconds")]
    ReadTimeout(u64),

    #[error("Malformed upstream record: {0}")]
    MalformedChunk(String),

    #[error("Client write failed")]
    ClientWriteFailure,
}

impl GatewayError {
    /// Status code used when this error is reported before streaming begins.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedRequest(_) | GatewayError::ModelUnavailable(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::UpstreamUnavailable(_) | GatewayError::UpstreamRejected { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamTimeout(_) | GatewayError::ReadTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::UpstreamCanceled | GatewayError::ClientWriteFailure => {
                StatusCode::REQUEST_TIMEOUT
            }
            GatewayError::MalformedChunk(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether this error means the client is no longer listening.
    pub fn client_gone(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamCanceled | GatewayError::ClientWriteFailure
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
