//! Gateway error types and their HTTP mapping
//!
//! Authorization failures, missing resources and revoked tokens all map to
//! the same bare 404 so callers cannot discover which nodes exist or whether a
//! credential was merely wrong.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or wrong admin credentials
    #[error("Not authorized")]
    NotAuthorized,

    /// Node, token or other resource does not exist
    #[error("Not found")]
    NotFound,

    /// Malformed request body or path
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Console token exists but is no longer active
    #[error("Console token revoked")]
    Revoked,

    /// The node's console backend could not be reached
    #[error("Console backend unavailable: {0}")]
    BackendUnavailable(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<ProtocolError> for GatewayError {
    fn from(err: ProtocolError) -> Self {
        GatewayError::InvalidInput(err.to_string())
    }
}

impl From<common::Error> for GatewayError {
    fn from(err: common::Error) -> Self {
        GatewayError::BackendUnavailable(err.to_string())
    }
}

impl GatewayError {
    /// Status code reported to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthorized | Self::NotFound | Self::Revoked => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Identical body for every hidden outcome.
            Self::NotAuthorized | Self::NotFound | Self::Revoked => "404 page not found".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
