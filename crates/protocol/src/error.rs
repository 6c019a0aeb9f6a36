//! Protocol error types

use thiserror::Error;

/// Errors raised while parsing or validating wire types
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Console token text was not a well-formed token
    #[error("Invalid console token: {0}")]
    InvalidToken(String),

    /// Connection descriptor failed validation
    #[error("Invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    /// Node identifier is empty or contains a path separator
    #[error("Invalid node id: {0:?}")]
    InvalidNodeId(String),

    /// JSON body could not be decoded
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
