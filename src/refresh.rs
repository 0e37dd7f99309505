//! Single-flight credential refresh.
//!
//! Every outgoing API request goes through [`RefreshCoordinator::execute`].
//! When a request comes back 401, the coordinator refreshes the credential
//! and retries the request exactly once. However many requests fail
//! concurrently, at most one refresh call is outstanding: the first caller
//! performs it, the rest park a oneshot in FIFO order and share its result.
//! The scheduled proactive refresh rides the same gate, so a proactive and
//! a reactive refresh firing together still collapse into one network call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::{oneshot, watch};

use crate::error::{AuthError, RefreshError};
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::session::{Role, SessionStore};

#[derive(Debug, Deserialize)]
struct RefreshResponseBody {
    credential: String,
    #[serde(default)]
    role: Option<Role>,
}

/// Coordinator-local single-flight state. Never exposed for external
/// mutation.
#[derive(Default)]
struct Gate {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<Result<String, RefreshError>>>,
}

pub struct RefreshCoordinator {
    http: reqwest::Client,
    api_url: String,
    store: Arc<SessionStore>,
    events: SessionEvents,
    gate: Mutex<Gate>,
}

impl RefreshCoordinator {
    pub fn new(api_url: impl Into<String>, store: Arc<SessionStore>, events: SessionEvents) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, store, events)
    }

    pub fn with_client(
        http: reqwest::Client,
        api_url: impl Into<String>,
        store: Arc<SessionStore>,
        events: SessionEvents,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            store,
            events,
            gate: Mutex::new(Gate::default()),
        }
    }

    /// Send an authorized request, transparently refreshing the credential
    /// on a 401 and retrying the request exactly once.
    ///
    /// A request that still gets 401 after its single retry surfaces
    /// [`AuthError::AuthorizationExpired`] — it is never queued again, so
    /// a misbehaving endpoint cannot cause a refresh loop.
    pub async fn execute(&self, request: Request) -> Result<Response, AuthError> {
        // Clone up front; a streaming body cannot be replayed.
        let retry = request.try_clone();

        let response = self
            .send_with_credential(request, self.store.credential())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(retry_request) = retry else {
            return Err(AuthError::AuthorizationExpired);
        };

        let credential = self.refresh_credential().await?;
        let response = self
            .send_with_credential(retry_request, Some(credential))
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::AuthorizationExpired);
        }
        Ok(response)
    }

    async fn send_with_credential(
        &self,
        mut request: Request,
        credential: Option<String>,
    ) -> Result<Response, AuthError> {
        if let Some(credential) = credential {
            if let Some(value) = bearer_value(&credential) {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        Ok(self.http.execute(request).await?)
    }

    /// Obtain a fresh credential through the single-flight gate.
    ///
    /// The first caller performs the network refresh; concurrent callers
    /// are parked in FIFO order and settled with the shared outcome. On
    /// failure the session is cleared and a `RefreshFailed` logout event
    /// is published before any caller observes the error.
    pub async fn refresh_credential(&self) -> Result<String, RefreshError> {
        let parked = {
            let mut gate = self.gate.lock();
            if gate.in_flight {
                let (tx, rx) = oneshot::channel();
                gate.waiters.push_back(tx);
                Some(rx)
            } else {
                gate.in_flight = true;
                None
            }
        };

        if let Some(rx) = parked {
            return rx
                .await
                .unwrap_or(Err(RefreshError::Failed("refresh abandoned".to_string())));
        }

        let result = self.do_refresh().await;
        if result.is_err() {
            // Fatal: unwind the session before anyone retries with it.
            self.store.clear();
            self.events.publish(SessionEvent::LoggedOut {
                reason: LogoutReason::RefreshFailed,
            });
        }

        let waiters = {
            let mut gate = self.gate.lock();
            gate.in_flight = false;
            std::mem::take(&mut gate.waiters)
        };
        // Strict FIFO: waiters settle in enqueue order.
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    async fn do_refresh(&self) -> Result<String, RefreshError> {
        let record = self.store.load().ok_or(RefreshError::NoSession)?;

        let url = format!("{}/auth/refresh", self.api_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&record.credential)
            .send()
            .await
            .map_err(|e| RefreshError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RefreshError::Failed(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }

        let body: RefreshResponseBody = response
            .json()
            .await
            .map_err(|e| RefreshError::Failed(e.to_string()))?;

        // The server may restate the role; absent, the one from login stands.
        let role = body.role.or(record.role);
        self.store.save(&body.credential, &record.identity, role);
        tracing::debug!("credential refreshed");
        Ok(body.credential)
    }

    /// Spawn the scheduled proactive refresh. Shares the single-flight
    /// gate with reactive refreshes; stops on its own once the session is
    /// gone or a refresh fails.
    pub fn spawn_proactive(self: &Arc<Self>, interval: Duration) -> ProactiveRefresh {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(proactive_loop(coordinator, interval, shutdown_rx));
        ProactiveRefresh { shutdown_tx, task }
    }
}

/// Handle for the proactive refresh timer.
pub struct ProactiveRefresh {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ProactiveRefresh {
    /// Signal the timer task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the timer task to complete. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn proactive_loop(
    coordinator: Arc<RefreshCoordinator>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if coordinator.store.load().is_none() {
                    return;
                }
                if let Err(e) = coordinator.refresh_credential().await {
                    tracing::warn!(error = %e, "proactive refresh failed");
                    return;
                }
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

fn bearer_value(credential: &str) -> Option<HeaderValue> {
    // An opaque token with non-header-safe bytes simply goes out without a
    // header; the server's 401 then drives the normal refresh path.
    HeaderValue::from_str(&format!("Bearer {}", credential)).ok()
}
