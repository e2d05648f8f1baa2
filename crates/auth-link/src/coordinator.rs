//! Single-flight credential refresh
//!
//! State machine:
//! - Idle → InFlight: the first caller to see an expired token starts the
//!   refresh exchange on a spawned task and waits for its outcome
//! - InFlight: later callers queue a waiter instead of starting a second exchange
//! - InFlight → Idle: the outcome is written (new pair stored, or session torn
//!   down) and only then is every waiter resolved, all under the state lock
//!
//! The new pair is only stored, and a failed refresh only tears down, while
//! the store still holds the session the exchange started from. A sign-out
//! or sign-in that lands mid-exchange wins, and waiters get whatever the
//! store holds then.
//!
//! Waiters are oneshot channels, so each is resolved exactly once. Running the
//! exchange on its own task means a caller that gives up (its future is
//! dropped) cannot leave the rest of the queue waiting forever.

use std::sync::Arc;

use session_auth::{CredentialPair, CredentialStore};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::{Error, Result};
use crate::teardown::SessionTeardown;

/// Outcome delivered to each waiter: the new pair, or `None` when the session ended.
type Waiter = oneshot::Sender<Option<CredentialPair>>;

enum RefreshState {
    Idle,
    InFlight { waiters: Vec<Waiter> },
}

/// Coordinates refreshes so at most one exchange is in flight per client.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RefreshState>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    teardown: SessionTeardown,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        teardown: SessionTeardown,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                transport,
                store,
                teardown,
            }),
        }
    }

    /// Obtain credentials newer than the ones that were just rejected.
    ///
    /// `stale_access` is the access token the failed request carried (`None`
    /// if it went out anonymously). When no refresh is running and the store
    /// already holds a different token, another flow has rotated the pair
    /// since this request was sent, and that pair is returned directly.
    ///
    /// Returns `Error::SessionExpired` when the refresh fails; by then the
    /// store has been cleared.
    pub async fn fresh_credentials(&self, stale_access: Option<&str>) -> Result<CredentialPair> {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                RefreshState::InFlight { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(waiting = waiters.len(), "refresh in flight, queued behind it");
                    rx
                }
                RefreshState::Idle => {
                    if let Some(current) = self.inner.store.get().await
                        && Some(current.access_token()) != stale_access
                    {
                        debug!("credentials already rotated, skipping refresh");
                        metrics::counter!("auth_refresh_skipped_total").increment(1);
                        return Ok(current);
                    }

                    let (tx, rx) = oneshot::channel();
                    *state = RefreshState::InFlight { waiters: vec![tx] };
                    debug!("starting refresh exchange");

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move { inner.drive_refresh().await });
                    rx
                }
            }
        };

        match receiver.await {
            Ok(Some(pair)) => Ok(pair),
            Ok(None) | Err(_) => Err(Error::SessionExpired),
        }
    }

    /// Whether a refresh exchange is currently in flight.
    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock().await, RefreshState::InFlight { .. })
    }

    /// Number of callers waiting on the current refresh (0 when idle).
    pub async fn waiting(&self) -> usize {
        match &*self.inner.state.lock().await {
            RefreshState::Idle => 0,
            RefreshState::InFlight { waiters } => waiters.len(),
        }
    }
}

/// How one refresh exchange ended.
enum Outcome {
    Refreshed(CredentialPair),
    /// The session was signed out or replaced while the exchange ran.
    Superseded,
    Failed {
        reason: String,
        /// Refresh token of the session the exchange was for, if there was one.
        session: Option<String>,
    },
}

impl Inner {
    /// Run one refresh exchange to completion and resolve every waiter.
    async fn drive_refresh(&self) {
        let resolved = match self.exchange().await {
            Outcome::Refreshed(pair) => {
                metrics::counter!("auth_refresh_total", "outcome" => "success").increment(1);
                info!("credential refresh succeeded");
                Some(pair)
            }
            Outcome::Superseded => {
                metrics::counter!("auth_refresh_total", "outcome" => "superseded").increment(1);
                info!("session changed during refresh, discarding refreshed pair");
                self.store.get().await
            }
            Outcome::Failed { reason, session } => {
                metrics::counter!("auth_refresh_total", "outcome" => "failure").increment(1);
                warn!(reason = %reason, "credential refresh failed, ending session");
                match session {
                    Some(refresh_token) => {
                        if self.teardown.run_for(&refresh_token).await {
                            None
                        } else {
                            self.store.get().await
                        }
                    }
                    None => {
                        self.teardown.run().await;
                        None
                    }
                }
            }
        };

        let mut state = self.state.lock().await;
        let waiters = match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InFlight { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        debug!(waiters = waiters.len(), resumed = resolved.is_some(), "resolving refresh waiters");
        for waiter in waiters {
            // Receiver gone means that caller was dropped; nothing to deliver
            let _ = waiter.send(resolved.clone());
        }
    }

    /// Exchange the stored refresh token and store the new pair, unless the
    /// session it belongs to has ended in the meantime.
    async fn exchange(&self) -> Outcome {
        let Some(current) = self.store.get().await else {
            return Outcome::Failed {
                reason: "no refresh token stored".into(),
                session: None,
            };
        };
        let session = current.refresh_token().to_string();

        let payload = match session_auth::refresh_session(self.transport.as_ref(), &session).await {
            Ok(payload) => payload,
            Err(e) => {
                return Outcome::Failed {
                    reason: e.to_string(),
                    session: Some(session),
                };
            }
        };

        let pair = payload.credentials();
        match self.store.replace_if(&session, &pair).await {
            Ok(true) => Outcome::Refreshed(pair),
            Ok(false) => Outcome::Superseded,
            Err(e) => Outcome::Failed {
                reason: format!("storing refreshed credentials: {e}"),
                session: Some(session),
            },
        }
    }
}
