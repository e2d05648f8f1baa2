//! GraphQL-over-HTTP transport
//!
//! POSTs `{"query","operationName","variables"}` to a single endpoint with the
//! operation's headers. GraphQL servers report authentication failures inside
//! the `errors` array, often alongside a 4xx status, so any body that parses as
//! a GraphQL document is handed back to the caller regardless of status.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::operation::{GraphQLResponse, Operation};
use crate::Transport;

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[instrument(skip_all, fields(operation = operation.operation_name().unwrap_or("anonymous")))]
    async fn send(&self, operation: &Operation) -> Result<GraphQLResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(operation.headers().clone())
            .timeout(self.timeout)
            .json(&operation.wire_body())
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        match serde_json::from_slice::<GraphQLResponse>(&body) {
            Ok(document) if document.data.is_some() || !document.errors.is_empty() => {
                debug!(
                    status = status.as_u16(),
                    errors = document.errors.len(),
                    "received GraphQL response"
                );
                Ok(document)
            }
            _ if !status.is_success() => Err(Error::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
            Ok(_) => Err(Error::Decode("response has neither data nor errors".into())),
            Err(e) => Err(Error::Decode(e.to_string())),
        }
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = Result<GraphQLResponse>> + Send + 'a>> {
        Box::pin(self.send(operation))
    }
}
