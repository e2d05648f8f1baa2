//! Scripted server double for pipeline tests

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use session_auth::DEFAULT_EXPIRY_SENTINEL;
use tokio::sync::Notify;
use transport::{GraphQLError, GraphQLResponse, Operation, Transport};

use crate::teardown::Navigator;

/// In-memory API server.
///
/// Operation names select behavior:
/// - `RefreshToken`: issues the configured next pair (or fails when none is set)
/// - `Public`: always succeeds, authenticated or not
/// - `MissingProject`: fails with a domain error
/// - `Offline`: fails at the transport level
/// - anything else: succeeds only with `Bearer <valid access token>`,
///   otherwise answers with the expiry sentinel (`with_sentinel` to change it)
pub(crate) struct FakeServer {
    valid_access: Mutex<String>,
    sentinel: String,
    next_pair: Mutex<Option<(String, String)>>,
    reject_every_token: AtomicBool,
    refresh_gate: Option<Arc<Notify>>,
    refresh_calls: AtomicUsize,
    domain_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    authorizations_seen: Mutex<Vec<Option<String>>>,
}

impl FakeServer {
    pub fn new(valid_access: &str) -> Self {
        Self {
            valid_access: Mutex::new(valid_access.to_string()),
            sentinel: DEFAULT_EXPIRY_SENTINEL.to_string(),
            next_pair: Mutex::new(None),
            reject_every_token: AtomicBool::new(false),
            refresh_gate: None,
            refresh_calls: AtomicUsize::new(0),
            domain_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            authorizations_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn refreshing_to(self, access: &str, refresh: &str) -> Self {
        self.set_next_pair(access, refresh);
        self
    }

    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = sentinel.to_string();
        self
    }

    /// Hold every refresh answer until `release_refresh` is called.
    pub fn with_refresh_gate(mut self) -> Self {
        self.refresh_gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Keep answering with the sentinel even for freshly issued tokens.
    pub fn rejecting_every_token(self) -> Self {
        self.reject_every_token.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_next_pair(&self, access: &str, refresh: &str) {
        *self.next_pair.lock().unwrap() = Some((access.to_string(), refresh.to_string()));
    }

    pub fn release_refresh(&self) {
        if let Some(gate) = &self.refresh_gate {
            gate.notify_one();
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn domain_calls(&self) -> usize {
        self.domain_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }

    pub fn authorizations_seen(&self) -> Vec<Option<String>> {
        self.authorizations_seen.lock().unwrap().clone()
    }

    async fn refresh(&self, operation: &Operation) -> transport::Result<GraphQLResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let token = operation.variables()["refreshToken"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.refresh_tokens_seen.lock().unwrap().push(token);

        if let Some(gate) = &self.refresh_gate {
            gate.notified().await;
        }

        let next = self.next_pair.lock().unwrap().clone();
        match next {
            Some((access, refresh)) => {
                *self.valid_access.lock().unwrap() = access.clone();
                Ok(GraphQLResponse::from_data(serde_json::json!({
                    "refreshToken": {
                        "accessToken": access,
                        "refreshToken": refresh,
                        "user": { "id": "u1", "username": "ada", "displayName": "Ada L." }
                    }
                })))
            }
            None => Ok(GraphQLResponse::from_errors(vec![GraphQLError::new(
                "Invalid refresh token",
            )])),
        }
    }

    fn domain(&self, operation: &Operation) -> transport::Result<GraphQLResponse> {
        self.domain_calls.fetch_add(1, Ordering::SeqCst);
        let authorization = operation.authorization().map(str::to_string);
        self.authorizations_seen
            .lock()
            .unwrap()
            .push(authorization.clone());

        match operation.operation_name() {
            Some("Public") => Ok(GraphQLResponse::from_data(
                serde_json::json!({ "tribes": [] }),
            )),
            Some("MissingProject") => Ok(GraphQLResponse::from_errors(vec![GraphQLError::new(
                "Project not found",
            )])),
            Some("Offline") => Err(transport::Error::Http("connection refused".into())),
            _ => {
                let expected = format!("Bearer {}", self.valid_access.lock().unwrap());
                let rejected = self.reject_every_token.load(Ordering::SeqCst)
                    || authorization.as_deref() != Some(expected.as_str());
                if rejected {
                    Ok(GraphQLResponse::from_errors(vec![GraphQLError::new(
                        self.sentinel.clone(),
                    )]))
                } else {
                    Ok(GraphQLResponse::from_data(
                        serde_json::json!({ "viewer": { "authorization": authorization } }),
                    ))
                }
            }
        }
    }
}

impl Transport for FakeServer {
    fn execute<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = transport::Result<GraphQLResponse>> + Send + 'a>> {
        Box::pin(async move {
            if operation.operation_name() == Some("RefreshToken") {
                self.refresh(operation).await
            } else {
                self.domain(operation)
            }
        })
    }
}

/// Navigator that remembers every redirect.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }
}
