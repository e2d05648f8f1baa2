//! Error types for authenticated delivery

/// Errors returned to callers of `AuthLink::execute`.
///
/// GraphQL errors other than the expiry sentinel are not errors at this
/// layer: they come back inside the `Ok` response exactly as the server sent them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Delivery failed without a GraphQL answer. Never triggers a refresh.
    #[error(transparent)]
    Transport(#[from] transport::Error),

    /// The refresh exchange failed and the session was torn down.
    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("access token is not a valid header value: {0}")]
    InvalidToken(String),
}

/// Result alias for auth-link operations.
pub type Result<T> = std::result::Result<T, Error>;
