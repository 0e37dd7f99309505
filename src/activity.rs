//! User activity tracking and local idle expiry.
//!
//! The monitor runs on a recurring timer while a session exists. Each tick
//! re-evaluates the persisted record; once it has gone idle (or passed its
//! absolute expiry) the record is cleared and a logout event is published
//! so dependent components drop their credential-derived state. This is
//! best-effort local policy — the server may enforce its own timeout, and
//! the store's `load()` applies the same check lazily in between ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::session::{SessionStatus, SessionStore};

/// The fixed set of user interaction signals that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
    Click,
}

/// Periodically evaluates the session store and expires idle sessions.
///
/// Spawn on login, shut down on logout. `shutdown()` synchronously
/// invalidates the timer so a stale tick can never clear a session that
/// was re-established afterwards.
pub struct IdleMonitor {
    store: Arc<SessionStore>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl IdleMonitor {
    pub fn spawn(store: Arc<SessionStore>, events: SessionEvents, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(
            Arc::clone(&store),
            events,
            interval,
            shutdown_rx,
        ));
        Self {
            store,
            shutdown_tx,
            task,
        }
    }

    /// Record a user interaction. Resets the activity clock while a live
    /// session exists; a no-op otherwise.
    pub fn record(&self, interaction: Interaction) {
        tracing::trace!(?interaction, "user activity");
        self.store.touch();
    }

    /// Signal the monitor task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the monitor task to complete. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn monitor_loop(
    store: Arc<SessionStore>,
    events: SessionEvents,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match store.status() {
                    SessionStatus::Active(_) => {}
                    SessionStatus::Expired => {
                        store.clear();
                        tracing::info!("session passed absolute expiry, logging out");
                        events.publish(SessionEvent::LoggedOut { reason: LogoutReason::Expired });
                        return;
                    }
                    SessionStatus::Idle => {
                        store.clear();
                        tracing::info!("session idle past inactivity timeout, logging out");
                        events.publish(SessionEvent::LoggedOut { reason: LogoutReason::IdleTimeout });
                        return;
                    }
                    // Cleared elsewhere (explicit logout); nothing left to watch.
                    SessionStatus::Missing => return,
                }
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn quick_store(dir: &tempfile::TempDir, inactivity: Duration) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(
            dir.path().join("session.json"),
            Duration::from_secs(3600),
            inactivity,
        ))
    }

    #[tokio::test]
    async fn idle_session_is_expired_and_event_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = quick_store(&dir, Duration::from_millis(50));
        store.save("tok", "id-1", None);

        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        let monitor = IdleMonitor::spawn(Arc::clone(&store), events, Duration::from_millis(20));

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor should fire within 2s")
            .unwrap();
        match event {
            SessionEvent::LoggedOut { reason } => assert_eq!(reason, LogoutReason::IdleTimeout),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(store.load().is_none(), "record should be cleared");

        monitor.join().await;
    }

    #[tokio::test]
    async fn activity_keeps_the_session_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = quick_store(&dir, Duration::from_millis(200));
        store.save("tok", "id-1", None);

        let events = SessionEvents::new();
        let monitor =
            IdleMonitor::spawn(Arc::clone(&store), events.clone(), Duration::from_millis(30));

        // Interact more often than the inactivity window for a while.
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            monitor.record(Interaction::KeyDown);
        }
        assert!(store.load().is_some(), "session should still be live");

        monitor.shutdown();
        monitor.join().await;
    }

    #[tokio::test]
    async fn monitor_stops_when_session_cleared_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = quick_store(&dir, Duration::from_secs(3600));
        store.save("tok", "id-1", None);

        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        let monitor = IdleMonitor::spawn(Arc::clone(&store), events, Duration::from_millis(20));

        store.clear();

        // Monitor exits without publishing anything.
        timeout(Duration::from_secs(2), monitor.join())
            .await
            .expect("monitor should exit after external clear");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_the_timer() {
        let dir = tempfile::tempdir().unwrap();
        let store = quick_store(&dir, Duration::from_millis(50));
        store.save("tok", "id-1", None);

        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        let monitor = IdleMonitor::spawn(Arc::clone(&store), events, Duration::from_millis(20));

        monitor.shutdown();
        timeout(Duration::from_secs(2), monitor.join())
            .await
            .expect("monitor should stop promptly");

        // A stale tick must not fire after shutdown even once the session
        // would have counted as idle.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn expired_session_reports_expired_not_idle() {
        let dir = tempfile::tempdir().unwrap();
        // Absolute expiry shorter than the inactivity window.
        let store = Arc::new(SessionStore::new(
            dir.path().join("session.json"),
            Duration::from_millis(50),
            Duration::from_secs(3600),
        ));
        store.save("tok", "id-1", None);

        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        let monitor = IdleMonitor::spawn(Arc::clone(&store), events, Duration::from_millis(20));

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor should fire")
            .unwrap();
        match event {
            SessionEvent::LoggedOut { reason } => assert_eq!(reason, LogoutReason::Expired),
            other => panic!("unexpected event: {:?}", other),
        }

        monitor.join().await;
    }
}
