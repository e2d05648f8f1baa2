//! Attachment stage: stamp the access token onto an operation

use reqwest::header::{AUTHORIZATION, HeaderValue};
use session_auth::CredentialPair;
use transport::Operation;

use crate::error::{Error, Result};

/// Return a copy of `operation` carrying `Authorization: Bearer <access>`.
///
/// Without credentials the operation is returned unchanged and goes out
/// anonymously. The original is never modified so it can be replayed later.
pub fn attach(operation: &Operation, credentials: Option<&CredentialPair>) -> Result<Operation> {
    let Some(pair) = credentials else {
        return Ok(operation.clone());
    };

    let mut value = HeaderValue::from_str(&format!("Bearer {}", pair.access_token()))
        .map_err(|e| Error::InvalidToken(e.to_string()))?;
    value.set_sensitive(true);

    Ok(operation.with_header(AUTHORIZATION, value))
}
