//! GraphQL delivery through the authenticated pipeline
//!
//! The browser application posts plain GraphQL requests here without any
//! credentials; `AuthLink` attaches the session's access token, refreshes it
//! on expiry and replays. The client only ever sees three outcomes:
//!
//! - `200`: the server's GraphQL document, errors included
//! - `401`: the session ended; the body names the login route
//! - `502`/`504`: the API could not be reached

use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};
use transport::Operation;

use crate::metrics::{ServiceMetrics, record_request};
use crate::session::Session;

/// Request body accepted on `POST /graphql`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQLRequest {
    query: String,
    #[serde(default)]
    operation_name: Option<String>,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

impl GraphQLRequest {
    fn into_operation(self) -> Operation {
        let mut operation = Operation::new(self.query);
        if let Some(name) = self.operation_name {
            operation = operation.with_operation_name(name);
        }
        if let Some(variables) = self.variables {
            operation = operation.with_variables(variables);
        }
        operation
    }
}

/// Build a JSON error response with the request id for correlation.
pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GraphQL-shaped answer telling the client to sign in again.
fn session_expired_response(login_route: &str) -> Response {
    let body = serde_json::json!({
        "errors": [{
            "message": "Session expired",
            "extensions": {
                "code": "SESSION_EXPIRED",
                "redirect": login_route,
            }
        }]
    });
    (
        StatusCode::UNAUTHORIZED,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Deliver one GraphQL request and record its outcome.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn deliver(
    session: &Session,
    metrics: &ServiceMetrics,
    body: Bytes,
    request_id: String,
) -> Response {
    metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    metrics.in_flight.fetch_add(1, Ordering::Relaxed);
    let start = Instant::now();

    let response = execute(session, body, &request_id).await;

    metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    let status = response.status();
    if !status.is_success() {
        metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    record_request(status.as_u16(), start.elapsed().as_secs_f64());
    response
}

async fn execute(session: &Session, body: Bytes, request_id: &str) -> Response {
    let request: GraphQLRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting malformed GraphQL request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("malformed GraphQL request: {e}"),
                request_id,
            );
        }
    };
    let operation = request.into_operation();

    match session.link.execute(&operation).await {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(body) => (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "gateway_error",
                &format!("failed to encode response: {e}"),
                request_id,
            ),
        },
        Err(auth_link::Error::SessionExpired) => {
            warn!(route = %session.login_route, "session expired during request");
            session_expired_response(&session.login_route)
        }
        Err(auth_link::Error::Transport(e)) => {
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            warn!(error = %e, status = status.as_u16(), "upstream delivery failed");
            error_response(status, "gateway_error", &e.to_string(), request_id)
        }
        Err(e @ auth_link::Error::InvalidToken(_)) => {
            error!(error = %e, "stored access token cannot be sent");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "gateway_error",
                &e.to_string(),
                request_id,
            )
        }
    }
}
