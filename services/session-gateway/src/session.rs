//! Session endpoints and the redirect signal
//!
//! - `POST /session/login`, `POST /session/signup`: exchange user input for a
//!   credential pair and store it with the user's profile
//! - `POST /session/logout`: clear the credential file
//! - `GET /session`: whether a pair is held, who it belongs to, and the
//!   pending redirect left behind by a session teardown

use std::sync::Arc;

use auth_link::{AuthLink, LinkConfig, Navigator};
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::Secret;
use serde::Deserialize;
use session_auth::{AuthPayload, CredentialStore, FileCredentialStore};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use transport::Transport;

use crate::gateway::error_response;

/// Navigator that publishes the login route when the session ends.
///
/// The browser application learns about it from `GET /session`; in-process
/// listeners subscribe to the watch channel.
#[derive(Debug)]
pub struct SessionSignal {
    redirect: watch::Sender<Option<String>>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (redirect, _) = watch::channel(None);
        Self { redirect }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.redirect.subscribe()
    }

    /// Route the client should be sent to, if the session was torn down.
    pub fn pending_redirect(&self) -> Option<String> {
        self.redirect.borrow().clone()
    }

    /// Forget the pending redirect after a new sign-in.
    pub fn reset(&self) {
        self.redirect.send_replace(None);
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator for SessionSignal {
    fn navigate(&self, route: &str) {
        self.redirect.send_replace(Some(route.to_string()));
    }
}

/// Everything the session and GraphQL handlers share.
#[derive(Clone)]
pub struct Session {
    pub link: AuthLink,
    pub store: Arc<FileCredentialStore>,
    pub signal: Arc<SessionSignal>,
    pub login_route: String,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<FileCredentialStore>,
        config: LinkConfig,
    ) -> Self {
        let signal = Arc::new(SessionSignal::new());
        let login_route = config.login_route.clone();
        let link = AuthLink::new(transport, store.clone(), signal.clone(), config);
        Self {
            link,
            store,
            signal,
            login_route,
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.get().await.is_some()
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    username: String,
    display_name: String,
    password: String,
}

#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn login(session: &Session, body: Bytes, request_id: String) -> Response {
    let request: LoginRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return invalid_body(&e, &request_id),
    };
    let password = Secret::from(request.password);

    let result = session_auth::login(
        session.link.transport().as_ref(),
        &request.username,
        password.expose(),
    )
    .await;
    establish(session, result, &request_id).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn signup(session: &Session, body: Bytes, request_id: String) -> Response {
    let request: SignupRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return invalid_body(&e, &request_id),
    };
    let password = Secret::from(request.password);

    let result = session_auth::signup(
        session.link.transport().as_ref(),
        &request.username,
        &request.display_name,
        password.expose(),
    )
    .await;
    establish(session, result, &request_id).await
}

/// Store the pair from a login or signup answer, or report why there is none.
async fn establish(
    session: &Session,
    result: session_auth::Result<AuthPayload>,
    request_id: &str,
) -> Response {
    let payload = match result {
        Ok(payload) => payload,
        Err(session_auth::Error::Rejected(message)) => {
            warn!(reason = %message, "sign-in rejected");
            return error_response(
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                &message,
                request_id,
            );
        }
        Err(e) => {
            error!(error = %e, "sign-in exchange failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "gateway_error",
                &e.to_string(),
                request_id,
            );
        }
    };

    if let Err(e) = session
        .store
        .set_session(&payload.credentials(), &payload.user)
        .await
    {
        error!(error = %e, "failed to store session");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "gateway_error",
            "failed to store session",
            request_id,
        );
    }
    session.signal.reset();
    info!(username = %payload.user.username, "signed in");

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authenticated": true,
            "user": payload.user,
        }),
    )
}

#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn logout(session: &Session, request_id: String) -> Response {
    if let Err(e) = session.store.clear().await {
        error!(error = %e, "failed to clear session");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "gateway_error",
            "failed to clear session",
            &request_id,
        );
    }
    info!("signed out");

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authenticated": false,
            "redirect": session.login_route,
        }),
    )
}

pub async fn status(session: &Session) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "authenticated": session.is_authenticated().await,
            "user": session.store.user().await,
            "redirect": session.signal.pending_redirect(),
        }),
    )
}

fn invalid_body(e: &serde_json::Error, request_id: &str) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        &format!("malformed request body: {e}"),
        request_id,
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_starts_without_redirect() {
        assert_eq!(SessionSignal::new().pending_redirect(), None);
        assert_eq!(SessionSignal::default().pending_redirect(), None);
    }

    #[test]
    fn navigate_publishes_route_until_reset() {
        let signal = SessionSignal::new();
        signal.navigate("/login");
        assert_eq!(signal.pending_redirect().as_deref(), Some("/login"));

        signal.reset();
        assert_eq!(signal.pending_redirect(), None);
    }

    #[tokio::test]
    async fn subscribers_see_redirect() {
        let signal = SessionSignal::new();
        let mut rx = signal.subscribe();

        signal.navigate("/welcome");

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("/welcome"));
    }

    #[test]
    fn login_request_rejects_missing_password() {
        let err = serde_json::from_str::<LoginRequest>(r#"{"username":"ada"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn signup_request_reads_camel_case() {
        let request: SignupRequest = serde_json::from_str(
            r#"{"username":"ada","displayName":"Ada L.","password":"hunter2"}"#,
        )
        .unwrap();
        assert_eq!(request.display_name, "Ada L.");
    }
}
