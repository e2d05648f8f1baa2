//! Login, signup and refresh exchanges
//!
//! All three are GraphQL mutations returning the same `AuthPayload`. They are
//! sent straight through a `Transport` with no Authorization header: the
//! refresh exchange in particular must never go through the expiry handling
//! it exists to serve.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use transport::{Operation, Transport};

use crate::constants::{LOGIN_MUTATION, REFRESH_TOKEN_MUTATION, SIGNUP_MUTATION};
use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

/// Profile of the signed-in user returned with every new pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

/// Successful response of login, signup and refresh.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub user: SessionUser,
}

impl AuthPayload {
    pub fn credentials(&self) -> CredentialPair {
        CredentialPair::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

impl fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPayload")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Exchange a refresh token for a new credential pair.
///
/// Any GraphQL error, a missing payload, or a transport failure is a refresh
/// failure; the caller decides whether that ends the session.
pub async fn refresh_session(
    transport: &dyn Transport,
    refresh_token: &str,
) -> Result<AuthPayload> {
    let operation = Operation::new(REFRESH_TOKEN_MUTATION)
        .with_operation_name("RefreshToken")
        .with_variables(variables(&[("refreshToken", refresh_token)]));
    exchange(transport, &operation, "refreshToken").await
}

/// Sign in with username and password.
pub async fn login(
    transport: &dyn Transport,
    username: &str,
    password: &str,
) -> Result<AuthPayload> {
    let operation = Operation::new(LOGIN_MUTATION)
        .with_operation_name("Login")
        .with_variables(variables(&[("username", username), ("password", password)]));
    exchange(transport, &operation, "login").await
}

/// Create an account and sign in.
pub async fn signup(
    transport: &dyn Transport,
    username: &str,
    display_name: &str,
    password: &str,
) -> Result<AuthPayload> {
    let operation = Operation::new(SIGNUP_MUTATION)
        .with_operation_name("Signup")
        .with_variables(variables(&[
            ("username", username),
            ("displayName", display_name),
            ("password", password),
        ]));
    exchange(transport, &operation, "signup").await
}

fn variables(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

async fn exchange(
    transport: &dyn Transport,
    operation: &Operation,
    field: &str,
) -> Result<AuthPayload> {
    let response = transport
        .execute(operation)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    if let Some(first) = response.errors.first() {
        return Err(Error::Rejected(first.message.clone()));
    }

    let payload = response
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .filter(|value| !value.is_null())
        .ok_or_else(|| Error::InvalidResponse(format!("response has no {field} payload")))?;

    serde_json::from_value(payload.clone())
        .map_err(|e| Error::InvalidResponse(format!("malformed {field} payload: {e}")))
}
