use thiserror::Error;

/// Errors surfaced by the credential refresh path.
///
/// `Clone` because a single refresh outcome is fanned out to every request
/// that was parked behind the in-flight refresh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// No persisted session exists, so there is no credential to refresh.
    #[error("no active session")]
    NoSession,
    /// The refresh endpoint rejected us or was unreachable. Fatal: the
    /// session has been cleared by the time callers see this.
    #[error("credential refresh failed: {0}")]
    Failed(String),
}

/// Errors surfaced by authorized HTTP requests and the auth endpoints.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request was retried once with a fresh credential and was still
    /// rejected. Never triggers another refresh.
    #[error("authorization expired")]
    AuthorizationExpired,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    /// The server answered with a non-auth failure status.
    #[error("server rejected request: {0}")]
    Rejected(reqwest::StatusCode),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Errors surfaced by `Dispatcher::send`.
///
/// A realtime ack timeout is not represented here: it is recovered by
/// falling back to the request-based path and only becomes visible when
/// that path also fails.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("fallback delivery failed: {0}")]
    FallbackFailed(String),
}
