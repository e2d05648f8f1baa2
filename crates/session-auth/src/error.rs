//! Error types for session credential operations

/// Errors from credential storage and the auth exchanges.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("invalid auth response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for session-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
