//! Persistent realtime connection with reconnect backoff.
//!
//! One WebSocket per authenticated identity. The connection task:
//! - Connects to the gateway with the identity as a query parameter
//! - On success: publishes `Connected`, runs a select loop (inbound frames
//!   forwarded in transport order, outbound frames to the sink, ping timer,
//!   shutdown signal)
//! - On drop or failure: publishes `Reconnecting(attempt)` and retries with
//!   exponential backoff until the attempt cap, after which it settles
//!   `Disconnected` and waits for an explicit reconnect trigger
//!
//! A voluntary `disconnect()` also settles `Disconnected` and is never
//! followed by an automatic reconnect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::protocol::Frame;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound frames buffered towards the socket. Small on purpose: the
/// dispatcher only enqueues while connected.
const OUTBOUND_CAPACITY: usize = 32;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
}

/// Backoff and retry policy for a connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): doubles each failure,
    /// bounded by `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

/// A single spawned connection task plus its control channels.
pub struct Connection {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::Sender<Frame>,
    task: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Spawn the persistent connection task for the given identity.
    /// Inbound frames are forwarded to `inbound_tx` in transport order.
    pub fn spawn(
        realtime_url: String,
        identity: String,
        inbound_tx: mpsc::Sender<Frame>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Starts at Connecting so a just-spawned connection is never
        // mistaken for a settled one.
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = tokio::spawn(connection_loop(
            realtime_url,
            identity,
            inbound_tx,
            outbound_rx,
            policy,
            state_tx,
            shutdown_rx,
        ));
        Self {
            shutdown_tx,
            state_rx,
            outbound_tx,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions (for tests and UI status indicators).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Sender for outbound frames on this connection instance.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outbound_tx.clone()
    }

    /// Voluntary close. Idempotent; never followed by a reconnect.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the connection task to complete. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Owns at most one live connection, keyed by the authenticated identity.
pub struct RealtimeManager {
    realtime_url: String,
    policy: ReconnectPolicy,
    inbound_tx: mpsc::Sender<Frame>,
    active: Mutex<Option<(String, Connection)>>,
}

impl RealtimeManager {
    pub fn new(
        realtime_url: impl Into<String>,
        policy: ReconnectPolicy,
        inbound_tx: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            realtime_url: realtime_url.into(),
            policy,
            inbound_tx,
            active: Mutex::new(None),
        }
    }

    /// Open (or keep) the connection for `identity`.
    ///
    /// A no-op while a non-disconnected connection for the same identity
    /// exists. A different identity, or a connection that exhausted its
    /// reconnect attempts, tears the old task down and spawns a fresh one.
    pub fn connect(&self, identity: &str) {
        let mut active = self.active.lock();
        if let Some((current, connection)) = active.as_ref() {
            if current == identity && connection.state() != ConnectionState::Disconnected {
                return;
            }
            connection.disconnect();
        }
        tracing::info!(identity = %identity, "opening realtime connection");
        *active = Some((
            identity.to_string(),
            Connection::spawn(
                self.realtime_url.clone(),
                identity.to_string(),
                self.inbound_tx.clone(),
                self.policy,
            ),
        ));
    }

    /// Close the active connection, if any. Idempotent.
    pub fn disconnect(&self) {
        if let Some((_, connection)) = self.active.lock().take() {
            connection.disconnect();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.active
            .lock()
            .as_ref()
            .map(|(_, connection)| connection.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Outbound sender for the active connection, only while `Connected`.
    pub fn outbound(&self) -> Option<mpsc::Sender<Frame>> {
        let active = self.active.lock();
        let (_, connection) = active.as_ref()?;
        if connection.state() == ConnectionState::Connected {
            Some(connection.sender())
        } else {
            None
        }
    }
}

async fn connection_loop(
    realtime_url: String,
    identity: String,
    inbound_tx: mpsc::Sender<Frame>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let endpoint = format!(
        "{}?identity={}",
        realtime_url,
        encode_query_value(&identity)
    );
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            let _ = state_tx.send(ConnectionState::Disconnected);
            return;
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        match tokio_tungstenite::connect_async(&endpoint).await {
            Ok((ws_stream, _)) => {
                attempt = 0;
                let _ = state_tx.send(ConnectionState::Connected);
                tracing::info!(identity = %identity, "realtime connected");

                run_connection(ws_stream, &inbound_tx, &mut outbound_rx, &mut shutdown_rx).await;

                if *shutdown_rx.borrow() {
                    let _ = state_tx.send(ConnectionState::Disconnected);
                    return;
                }
                tracing::warn!(identity = %identity, "realtime connection dropped");
            }
            Err(e) => {
                tracing::debug!(identity = %identity, error = %e, "realtime connect failed");
            }
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            tracing::warn!(
                identity = %identity,
                attempts = policy.max_attempts,
                "reconnect attempts exhausted, staying disconnected"
            );
            let _ = state_tx.send(ConnectionState::Disconnected);
            return;
        }

        let _ = state_tx.send(ConnectionState::Reconnecting(attempt));
        tokio::select! {
            _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
            _ = shutdown_rx.changed() => {
                let _ = state_tx.send(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

async fn run_connection(
    ws_stream: WsStream,
    inbound_tx: &mpsc::Sender<Frame>,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(text.as_str()) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).await.is_err() {
                                    break; // Dispatcher gone.
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Binary frames are not part of the protocol.
                    Some(Err(_)) => break,
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => match frame.encode() {
                        Ok(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "dropping unencodable frame");
                        }
                    },
                    None => break, // All senders dropped.
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Percent-encode an identity for use as a query parameter value.
fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for b in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    encoded
}
