//! Authenticated request pipeline with single-flight credential refresh
//!
//! Every operation passes through the same stages:
//! 1. `attach` stamps `Authorization: Bearer <access>` from the credential store
//! 2. The transport delivers it
//! 3. `classify` checks the errors for the exact expiry sentinel
//! 4. On expiry, `RefreshCoordinator` runs at most one refresh exchange at a
//!    time; every concurrent caller waits on that same exchange
//! 5. The operation is replayed once with the new pair, or fails with
//!    `Error::SessionExpired` after `SessionTeardown` has cleared the store
//!
//! Everything other than the sentinel passes through untouched.

pub mod attach;
pub mod coordinator;
pub mod error;
pub mod expiry;
pub mod link;
pub mod teardown;

#[cfg(test)]
mod testing;

pub use attach::attach;
pub use coordinator::RefreshCoordinator;
pub use error::{Error, Result};
pub use expiry::{Classification, classify};
pub use link::{AuthLink, LinkConfig};
pub use teardown::{Navigator, NoopNavigator, SessionTeardown};
