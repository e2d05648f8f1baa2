//! Session teardown after a failed refresh
//!
//! Clearing the store is what makes the teardown terminal: with no refresh
//! token left, later expiries fail immediately instead of contacting the
//! server, until a new login writes a fresh pair.

use std::sync::Arc;

use session_auth::CredentialStore;
use tracing::{debug, error, warn};

/// Host application hook for leaving the authenticated area.
pub trait Navigator: Send + Sync {
    /// Send the user to `route` (the unauthenticated entry point).
    fn navigate(&self, route: &str);
}

/// Navigator for embedders with nowhere to send the user.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate(&self, _route: &str) {}
}

/// Clears credentials and redirects to the login route.
#[derive(Clone)]
pub struct SessionTeardown {
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
}

impl SessionTeardown {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            login_route: login_route.into(),
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// End the session. Safe to call any number of times.
    pub async fn run(&self) {
        if let Err(e) = self.store.clear().await {
            error!(error = %e, "failed to clear credential store during teardown");
        }
        self.redirect();
    }

    /// End the session that `refresh_token` belongs to.
    ///
    /// Does nothing and returns `false` when the store no longer holds that
    /// session: the user signed out or signed in again while the refresh ran.
    pub async fn run_for(&self, refresh_token: &str) -> bool {
        match self.store.clear_if(refresh_token).await {
            Ok(false) => {
                debug!("session already replaced, skipping teardown");
                return false;
            }
            Ok(true) => {}
            Err(e) => {
                error!(error = %e, "failed to clear credential store during teardown");
            }
        }
        self.redirect();
        true
    }

    fn redirect(&self) {
        metrics::counter!("auth_session_teardown_total").increment(1);
        warn!(route = %self.login_route, "session ended, redirecting to login");
        self.navigator.navigate(&self.login_route);
    }
}
