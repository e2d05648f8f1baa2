//! Expiry detection for GraphQL responses
//!
//! Only the server's exact "credential expired" message triggers a refresh.
//! Business errors routinely mention authentication in their text ("You are
//! not authenticated to edit this tribe"), so this deliberately does no
//! substring, case-folding or whitespace-trimming match.

use transport::GraphQLResponse;

/// What to do with a response that came back from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The access token was rejected; refresh and replay once.
    CredentialExpired,
    /// Return to the caller unmodified.
    PassThrough,
}

/// Classify a response by looking for `sentinel` among its error messages.
pub fn classify(response: &GraphQLResponse, sentinel: &str) -> Classification {
    if response.errors.iter().any(|error| error.message == sentinel) {
        Classification::CredentialExpired
    } else {
        Classification::PassThrough
    }
}
