use thiserror::Error;

/// Failure to read or write a wire envelope
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope is missing a string `type` discriminator")]
    MissingType,
}

/// Errors raised by the session client
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("session driver has stopped")]
    DriverGone,
}
