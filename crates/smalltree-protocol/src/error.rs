use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

impl ProtocolError {
    /// The JSON-RPC error code matching this error.
    pub fn code(&self) -> i32 {
        match self {
            ProtocolError::Serialization(_) => crate::PARSE_ERROR,
            ProtocolError::InvalidRequest(_) => crate::INVALID_REQUEST,
            ProtocolError::UnknownMethod(_) => crate::METHOD_NOT_FOUND,
            ProtocolError::InvalidParams(_) => crate::INVALID_PARAMS,
        }
    }
}
