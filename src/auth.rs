//! HTTP auth collaborators and session lifecycle.
//!
//! [`AuthClient`] is a thin typed wrapper over the auth service's four
//! endpoints. [`SessionManager`] ties the pieces together: login persists
//! the credential and starts the idle monitor and proactive refresh;
//! logout tears the timers down synchronously so no stale callback can
//! revive a cleared session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::activity::IdleMonitor;
use crate::error::AuthError;
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::refresh::{ProactiveRefresh, RefreshCoordinator};
use crate::session::{Role, SessionStore};

#[derive(Debug, Clone, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// The login response states the role explicitly — the client never
/// decodes the opaque credential to discover it.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub credential: String,
    pub identity: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
    pub identity: String,
    pub valid: bool,
}

/// Typed client for the backend auth service.
pub struct AuthClient {
    http: reqwest::Client,
    api_url: String,
}

impl AuthClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let url = format!("{}/auth/login", self.api_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::Rejected(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Check the credential against the server. An explicit health probe,
    /// not a per-request gate — the role from login/refresh stands until
    /// the next refresh.
    pub async fn validate(&self, credential: &str) -> Result<ValidateResponse, AuthError> {
        let url = format!("{}/auth/validate", self.api_url);
        let response = self.http.get(&url).bearer_auth(credential).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Rejected(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Best-effort server-side logout. Failures are logged and swallowed;
    /// the local session is cleared regardless.
    pub async fn logout(&self, credential: &str) {
        let url = format!("{}/auth/logout", self.api_url);
        match self.http.post(&url).bearer_auth(credential).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(status = %response.status(), "server-side logout rejected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "server-side logout unreachable");
            }
        }
    }
}

/// Intervals for the per-session timers.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimers {
    pub idle_check_interval: Duration,
    pub proactive_refresh_interval: Duration,
}

impl Default for SessionTimers {
    fn default() -> Self {
        Self {
            idle_check_interval: Duration::from_secs(60),
            proactive_refresh_interval: Duration::from_secs(20 * 60),
        }
    }
}

/// Owns the session lifecycle: login, logout, and the timers that only
/// run while a session exists.
pub struct SessionManager {
    auth: AuthClient,
    store: Arc<SessionStore>,
    events: SessionEvents,
    refresh: Arc<RefreshCoordinator>,
    timers: SessionTimers,
    monitor: Mutex<Option<IdleMonitor>>,
    proactive: Mutex<Option<ProactiveRefresh>>,
}

impl SessionManager {
    pub fn new(
        auth: AuthClient,
        store: Arc<SessionStore>,
        events: SessionEvents,
        refresh: Arc<RefreshCoordinator>,
        timers: SessionTimers,
    ) -> Self {
        Self {
            auth,
            store,
            events,
            refresh,
            timers,
            monitor: Mutex::new(None),
            proactive: Mutex::new(None),
        }
    }

    /// Log in, persist the session, and start monitoring.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let response = self.auth.login(email, password).await?;
        self.store
            .save(&response.credential, &response.identity, response.role);
        self.events.publish(SessionEvent::LoggedIn {
            identity: response.identity.clone(),
            role: response.role,
        });
        self.start_timers();
        Ok(response)
    }

    /// Log out: best-effort server call, then local teardown. The timers
    /// are invalidated before the record is cleared.
    pub async fn logout(&self) {
        let credential = self.store.load().map(|record| record.credential);
        self.stop_timers();
        self.store.clear();
        if let Some(credential) = credential {
            self.auth.logout(&credential).await;
        }
        self.events.publish(SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequest,
        });
    }

    /// Record a user interaction (no-op without a session).
    pub fn record_activity(&self, interaction: crate::activity::Interaction) {
        if let Some(monitor) = self.monitor.lock().as_ref() {
            monitor.record(interaction);
        } else {
            self.store.touch();
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Both timer tasks can exit on their own (idle timeout, absolute
    /// expiry, failed refresh), leaving a stale handle in the slot. Always
    /// replace, shutting down whatever was there, so every login gets a
    /// live monitor and refresh timer.
    fn start_timers(&self) {
        let prior = self.monitor.lock().replace(IdleMonitor::spawn(
            Arc::clone(&self.store),
            self.events.clone(),
            self.timers.idle_check_interval,
        ));
        if let Some(monitor) = prior {
            monitor.shutdown();
        }
        let prior = self
            .proactive
            .lock()
            .replace(self.refresh.spawn_proactive(self.timers.proactive_refresh_interval));
        if let Some(proactive) = prior {
            proactive.shutdown();
        }
    }

    /// Synchronously signal both timers to stop and drop their handles.
    fn stop_timers(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }
        if let Some(proactive) = self.proactive.lock().take() {
            proactive.shutdown();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    async fn spawn_auth_server() -> std::net::SocketAddr {
        use axum::response::IntoResponse;

        let app = Router::new()
            .route(
                "/auth/login",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["password"] == "right" {
                        Json(serde_json::json!({
                            "credential": "tok-1",
                            "identity": "user-1",
                            "role": "admin",
                        }))
                        .into_response()
                    } else {
                        axum::http::StatusCode::UNAUTHORIZED.into_response()
                    }
                }),
            )
            .route("/auth/logout", post(|| async { "ok" }))
            .route(
                "/auth/validate",
                axum::routing::get(|headers: axum::http::HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v == "Bearer tok-1")
                        .unwrap_or(false);
                    if authorized {
                        Json(serde_json::json!({"identity": "user-1", "valid": true}))
                            .into_response()
                    } else {
                        axum::http::StatusCode::UNAUTHORIZED.into_response()
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn manager_for(addr: std::net::SocketAddr, dir: &tempfile::TempDir) -> SessionManager {
        let api_url = format!("http://{}", addr);
        let store = Arc::new(SessionStore::new(
            dir.path().join("session.json"),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        ));
        let events = SessionEvents::new();
        let refresh = Arc::new(RefreshCoordinator::new(
            api_url.clone(),
            Arc::clone(&store),
            events.clone(),
        ));
        SessionManager::new(
            AuthClient::new(api_url),
            store,
            events,
            refresh,
            SessionTimers {
                idle_check_interval: Duration::from_secs(3600),
                proactive_refresh_interval: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn login_persists_record_and_publishes() {
        let addr = spawn_auth_server().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(addr, &dir);
        let mut rx = manager.events().subscribe();

        let response = manager.login("a@example.com", "right").await.unwrap();
        assert_eq!(response.credential, "tok-1");
        assert_eq!(response.role, Some(Role::Admin));

        let record = manager.store().load().expect("record persisted");
        assert_eq!(record.credential, "tok-1");
        assert_eq!(record.identity, "user-1");

        match rx.recv().await.unwrap() {
            SessionEvent::LoggedIn { identity, role } => {
                assert_eq!(identity, "user-1");
                assert_eq!(role, Some(Role::Admin));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        manager.logout().await;
    }

    #[tokio::test]
    async fn bad_password_is_rejected_and_nothing_persisted() {
        let addr = spawn_auth_server().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(addr, &dir);

        let result = manager.login("a@example.com", "wrong").await;
        assert!(matches!(result, Err(AuthError::Rejected(_))));
        assert!(manager.store().load().is_none());
    }

    #[tokio::test]
    async fn relogin_after_idle_logout_is_monitored_again() {
        let addr = spawn_auth_server().await;
        let dir = tempfile::tempdir().unwrap();

        let api_url = format!("http://{}", addr);
        let store = Arc::new(SessionStore::new(
            dir.path().join("session.json"),
            Duration::from_secs(3600),
            Duration::from_millis(100),
        ));
        let events = SessionEvents::new();
        let refresh = Arc::new(RefreshCoordinator::new(
            api_url.clone(),
            Arc::clone(&store),
            events.clone(),
        ));
        let manager = SessionManager::new(
            AuthClient::new(api_url),
            store,
            events,
            refresh,
            SessionTimers {
                idle_check_interval: Duration::from_millis(20),
                proactive_refresh_interval: Duration::from_secs(3600),
            },
        );
        let mut rx = manager.events().subscribe();

        // First session: let it idle out.
        manager.login("a@example.com", "right").await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::LoggedIn { .. }
        ));
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("first session should idle out")
            .unwrap()
        {
            SessionEvent::LoggedOut { reason } => {
                assert_eq!(reason, LogoutReason::IdleTimeout)
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Second session must be monitored just like the first: the idle
        // monitor's self-exit above must not leave a dead handle behind.
        manager.login("a@example.com", "right").await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::LoggedIn { .. }
        ));
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("second session should idle out too")
            .unwrap()
        {
            SessionEvent::LoggedOut { reason } => {
                assert_eq!(reason, LogoutReason::IdleTimeout)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn validate_reports_server_verdict() {
        let addr = spawn_auth_server().await;
        let client = AuthClient::new(format!("http://{}", addr));

        let verdict = client.validate("tok-1").await.unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.identity, "user-1");

        let result = client.validate("bogus").await;
        assert!(matches!(result, Err(AuthError::Rejected(_))));
    }

    #[tokio::test]
    async fn logout_clears_record_and_publishes() {
        let addr = spawn_auth_server().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(addr, &dir);

        manager.login("a@example.com", "right").await.unwrap();
        let mut rx = manager.events().subscribe();

        manager.logout().await;
        assert!(manager.store().load().is_none());

        match rx.recv().await.unwrap() {
            SessionEvent::LoggedOut { reason } => {
                assert_eq!(reason, LogoutReason::UserRequest)
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Logging out twice is harmless.
        manager.logout().await;
    }
}
