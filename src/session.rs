//! Persisted session state: the single source of truth for "is there a
//! logged-in identity".
//!
//! The store owns one durable slot (a JSON file) holding the bearer
//! credential, the server-stated role, and the timestamps that drive both
//! absolute expiry and local idle expiry. All operations are synchronous
//! and side-effecting on that file; nothing here touches the network.
//!
//! A corrupt slot is treated identically to an empty one — callers never
//! see a storage error.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Role granted by the auth service at login or refresh.
///
/// The client never decodes the opaque credential to discover this; the
/// server states it explicitly in the login/refresh response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// The persisted session record. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub credential: String,
    pub role: Option<Role>,
    pub identity: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub last_activity_at: u64,
}

/// Liveness of the persisted record, without the lazy-eviction side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// No record (or a corrupt one, which has been removed).
    Missing,
    Active(SessionRecord),
    /// Past `expires_at`.
    Expired,
    /// No user activity for longer than the inactivity timeout.
    Idle,
}

pub struct SessionStore {
    path: PathBuf,
    session_duration: Duration,
    inactivity_timeout: Duration,
    // Serializes read-modify-write cycles (touch, save) across threads.
    lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: PathBuf, session_duration: Duration, inactivity_timeout: Duration) -> Self {
        Self {
            path,
            session_duration,
            inactivity_timeout,
            lock: Mutex::new(()),
        }
    }

    /// Default location for the session slot.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
            .join("session.json")
    }

    /// Persist a new record, overwriting any prior one in this slot.
    ///
    /// `expires_at` is clamped to be non-decreasing across saves so a
    /// refresh can never shorten the session it is extending.
    pub fn save(&self, credential: &str, identity: &str, role: Option<Role>) -> SessionRecord {
        let _guard = self.lock.lock();
        let now = now_ms();
        let prior_expiry = self.read_raw().map(|r| r.expires_at).unwrap_or(0);
        let record = SessionRecord {
            credential: credential.to_string(),
            role,
            identity: identity.to_string(),
            issued_at: now,
            expires_at: (now + self.session_duration.as_millis() as u64).max(prior_expiry),
            last_activity_at: now,
        };
        self.write(&record);
        record
    }

    /// Return the current record if it is neither expired nor idle.
    ///
    /// An expired or idle record is cleared as a lazy-eviction side effect
    /// and `None` is returned.
    pub fn load(&self) -> Option<SessionRecord> {
        match self.status() {
            SessionStatus::Active(record) => Some(record),
            SessionStatus::Missing => None,
            SessionStatus::Expired | SessionStatus::Idle => {
                self.clear();
                None
            }
        }
    }

    /// Evaluate the record without evicting it. Lets the idle monitor
    /// distinguish absolute expiry from idle timeout before clearing.
    pub fn status(&self) -> SessionStatus {
        let Some(record) = self.read_raw() else {
            return SessionStatus::Missing;
        };
        let now = now_ms();
        if now >= record.expires_at {
            return SessionStatus::Expired;
        }
        if now.saturating_sub(record.last_activity_at) > self.inactivity_timeout.as_millis() as u64
        {
            return SessionStatus::Idle;
        }
        SessionStatus::Active(record)
    }

    /// Convenience accessor for the current credential.
    pub fn credential(&self) -> Option<String> {
        self.load().map(|record| record.credential)
    }

    /// Record user activity. A no-op unless a live session exists — a
    /// stale interaction event must not revive an expired or idle record.
    pub fn touch(&self) {
        let _guard = self.lock.lock();
        if let SessionStatus::Active(mut record) = self.status() {
            record.last_activity_at = now_ms();
            self.write(&record);
        }
    }

    /// Delete the persisted record. Never fails; missing file is fine.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clear session slot");
            }
        }
    }

    /// Read and parse the slot. Corruption is logged, the file removed,
    /// and `None` returned — identical to "no record".
    fn read_raw(&self) -> Option<SessionRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable session slot, treating as empty");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt session slot, discarding");
                let _ = std::fs::remove_file(&self.path);
                None
            }
        }
    }

    /// Write the record. The slot holds the credential, so it is created
    /// with owner-only permissions on unix. Failures are logged, not
    /// surfaced — the store's contract is side-effect-only.
    fn write(&self, record: &SessionRecord) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create session dir");
                return;
            }
        }
        let contents = match serde_json::to_string(record) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize session record");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, contents) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write session slot");
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
