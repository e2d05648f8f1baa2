//! GraphQL documents and defaults shared between client and server
//!
//! The expiry sentinel is a contract with the API server: it is the exact
//! `message` the server puts in `errors` when the access token is missing,
//! expired or invalid. It is matched byte-for-byte.

/// Default error message signalling an expired access token.
pub const DEFAULT_EXPIRY_SENTINEL: &str = "Authentication required";

/// Default unauthenticated entry route of the host application.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Field name of the access token in the stored session record.
pub const ACCESS_TOKEN_FIELD: &str = "accessToken";

/// Field name of the refresh token in the stored session record.
pub const REFRESH_TOKEN_FIELD: &str = "refreshToken";

/// Field name of the user profile in the stored session record.
pub const USER_FIELD: &str = "user";

pub const REFRESH_TOKEN_MUTATION: &str = r#"mutation RefreshToken($refreshToken: String!) {
  refreshToken(refreshToken: $refreshToken) {
    accessToken
    refreshToken
    user { id username displayName }
  }
}"#;

pub const LOGIN_MUTATION: &str = r#"mutation Login($username: String!, $password: String!) {
  login(username: $username, password: $password) {
    accessToken
    refreshToken
    user { id username displayName }
  }
}"#;

pub const SIGNUP_MUTATION: &str = r#"mutation Signup($username: String!, $displayName: String!, $password: String!) {
  signup(username: $username, displayName: $displayName, password: $password) {
    accessToken
    refreshToken
    user { id username displayName }
  }
}"#;
