//! Session credentials for the Tribe API
//!
//! Owns the credential pair (access + refresh token) and the three GraphQL
//! exchanges that produce one: login, signup and refresh. Persistence is
//! behind the `CredentialStore` port so the refresh logic in `auth-link`
//! runs unchanged against a file, memory, or any other medium.
//!
//! Credential flow:
//! 1. Gateway calls `token::login()` (or `token::signup()`) with user input
//! 2. Pair + user profile stored via `FileCredentialStore::set_session()`
//! 3. Every outgoing operation reads the pair through `CredentialStore::get()`
//! 4. On expiry, `auth-link` calls `token::refresh_session()` exactly once
//! 5. The new pair replaces the old one via `CredentialStore::set()`
//! 6. Logout or refresh failure empties the slot via `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use token::{AuthPayload, SessionUser, login, refresh_session, signup};
