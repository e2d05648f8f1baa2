//! Authenticated delivery: attach, send, detect expiry, refresh, replay

use std::sync::Arc;

use session_auth::{CredentialPair, CredentialStore, DEFAULT_EXPIRY_SENTINEL, DEFAULT_LOGIN_ROUTE};
use tracing::{debug, instrument};
use transport::{GraphQLResponse, Operation, Transport};

use crate::attach::attach;
use crate::coordinator::RefreshCoordinator;
use crate::error::Result;
use crate::expiry::{Classification, classify};
use crate::teardown::{Navigator, SessionTeardown};

/// Settings agreed with the server and the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Exact error message the server uses for an expired access token.
    pub expiry_sentinel: String,
    /// Unauthenticated entry route the host navigates to after teardown.
    pub login_route: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            expiry_sentinel: DEFAULT_EXPIRY_SENTINEL.to_string(),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
        }
    }
}

/// Request pipeline that keeps operations authenticated.
///
/// One `AuthLink` (and its clones) shares one `RefreshCoordinator`, so the
/// single-flight guarantee holds per client, not per process.
#[derive(Clone)]
pub struct AuthLink {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
    expiry_sentinel: String,
}

impl AuthLink {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        config: LinkConfig,
    ) -> Self {
        let teardown = SessionTeardown::new(store.clone(), navigator, config.login_route);
        let coordinator = RefreshCoordinator::new(transport.clone(), store.clone(), teardown);
        Self {
            transport,
            store,
            coordinator,
            expiry_sentinel: config.expiry_sentinel,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Deliver `operation` with the current credentials.
    ///
    /// - Transport failures and every GraphQL error other than the expiry
    ///   sentinel are returned unmodified, with no refresh.
    /// - On the sentinel, waits for fresh credentials and replays once.
    /// - If the refresh fails, returns `Error::SessionExpired`.
    #[instrument(skip_all, fields(operation = operation.operation_name().unwrap_or("anonymous")))]
    pub async fn execute(&self, operation: &Operation) -> Result<GraphQLResponse> {
        let credentials = self.store.get().await;
        let attached = attach(operation, credentials.as_ref())?;
        let response = self.transport.execute(&attached).await?;

        match classify(&response, &self.expiry_sentinel) {
            Classification::PassThrough => Ok(response),
            Classification::CredentialExpired => {
                debug!("access token rejected, waiting for fresh credentials");
                let stale = credentials.as_ref().map(CredentialPair::access_token);
                let fresh = self.coordinator.fresh_credentials(stale).await?;
                self.replay(operation, &fresh).await
            }
        }
    }

    /// Re-send the original (unattached) operation once with `credentials`.
    ///
    /// The result is final: a second expiry is returned to the caller as-is
    /// rather than starting another refresh.
    async fn replay(
        &self,
        operation: &Operation,
        credentials: &CredentialPair,
    ) -> Result<GraphQLResponse> {
        let attached = attach(operation, Some(credentials))?;
        metrics::counter!("auth_replay_total").increment(1);
        debug!("replaying operation with refreshed credentials");
        Ok(self.transport.execute(&attached).await?)
    }
}
