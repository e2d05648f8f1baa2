//! GraphQL request transport
//!
//! Defines the `Transport` trait that decouples request delivery from the
//! credential handling layered on top of it. `HttpTransport` posts operations
//! to a GraphQL endpoint over HTTP; tests substitute scripted doubles.
//!
//! A transport never retries and never interprets GraphQL errors: it returns
//! the server's document (data + errors) or a structured transport `Error`.

pub mod error;
pub mod http;
pub mod operation;

pub use error::{Error, Result};
pub use http::HttpTransport;
pub use operation::{GraphQLError, GraphQLResponse, Operation};

use std::future::Future;
use std::pin::Pin;

/// Sends prepared operations to the server.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Deliver one operation and return the server's GraphQL document.
    ///
    /// GraphQL-level failures (including expired credentials) come back as
    /// `Ok` with a non-empty `errors` list. `Err` is reserved for failures
    /// where no GraphQL document was received.
    fn execute<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = Result<GraphQLResponse>> + Send + 'a>>;
}
