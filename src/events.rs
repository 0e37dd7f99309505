//! Session lifecycle notifications.
//!
//! Components holding credential-derived state (the realtime connection,
//! UI stores) subscribe here so a logout — voluntary or forced — reaches
//! all of them without direct coupling.

use tokio::sync::broadcast;

use crate::session::Role;

pub const EVENT_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user asked to log out.
    UserRequest,
    /// Local inactivity policy fired.
    IdleTimeout,
    /// The record passed its absolute expiry.
    Expired,
    /// A credential refresh failed; the session is unrecoverable.
    RefreshFailed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    LoggedIn { identity: String, role: Option<Role> },
    LoggedOut { reason: LogoutReason },
}

/// Fan-out handle for session events. Cloning shares the channel.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_is_fine() {
        let events = SessionEvents::new();
        events.publish(SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequest,
        });
    }

    #[tokio::test]
    async fn multiple_subscribers_receive() {
        let events = SessionEvents::new();
        let mut rx1 = events.subscribe();
        let mut rx2 = events.subscribe();

        events.publish(SessionEvent::LoggedIn {
            identity: "id-1".into(),
            role: Some(Role::User),
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                SessionEvent::LoggedIn { identity, role } => {
                    assert_eq!(identity, "id-1");
                    assert_eq!(role, Some(Role::User));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn clone_shares_channel() {
        let events = SessionEvents::new();
        let clone = events.clone();
        let mut rx = events.subscribe();

        clone.publish(SessionEvent::LoggedOut {
            reason: LogoutReason::IdleTimeout,
        });

        match rx.recv().await.unwrap() {
            SessionEvent::LoggedOut { reason } => assert_eq!(reason, LogoutReason::IdleTimeout),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
