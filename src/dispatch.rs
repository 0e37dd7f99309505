//! Inbound frame fan-out and acknowledged outbound sends.
//!
//! The dispatcher pumps frames off the realtime connection and multiplexes
//! them to subscribers by kind. Outbound sends carry a correlation id and
//! wait for the server to echo it back; if the acknowledgment misses its
//! deadline — or the connection isn't up in the first place — delivery
//! falls back to the request-based HTTP path, so every send settles
//! exactly once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::connection::RealtimeManager;
use crate::error::SendError;
use crate::protocol::{Frame, FrameKind, OutboundMessage, TypingSignal};

/// Inbound frames buffered between the connection and the pump task.
pub const INBOUND_CAPACITY: usize = 64;

pub type Handler = Box<dyn Fn(&Value) + Send + Sync>;

/// The non-realtime delivery path (the surrounding request-based API).
pub type Fallback =
    Arc<dyn Fn(OutboundMessage) -> BoxFuture<'static, Result<Value, SendError>> + Send + Sync>;

/// How an outbound message was delivered. The payload is the server's
/// message representation from whichever path settled first.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Realtime(Value),
    Fallback(Value),
}

/// Handlers are stored refcounted so fan-out can snapshot the list and
/// invoke outside the registry lock.
type StoredHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Registry {
    subscribers: Mutex<HashMap<FrameKind, Vec<(u64, StoredHandler)>>>,
    next_subscriber_id: AtomicU64,
    /// Outbound sends awaiting their acknowledgment frame, by correlation
    /// id. An entry is removed exactly once: by the matching ack or by the
    /// deadline, whichever comes first.
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl Registry {
    fn fan_out(&self, kind: FrameKind, payload: &Value) {
        // Snapshot the list and invoke outside the lock: a handler may
        // subscribe, or drop a Subscription, both of which take it.
        let handlers: Vec<StoredHandler> = {
            let subscribers = self.subscribers.lock();
            match subscribers.get(&kind) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            // A panicking handler must not take down the pump task.
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                tracing::error!(?kind, "subscriber handler panicked");
            }
        }
    }
}

/// Unsubscribes its handler when dropped.
pub struct Subscription {
    registry: Weak<Registry>,
    kind: FrameKind,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(handlers) = registry.subscribers.lock().get_mut(&self.kind) {
                handlers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    realtime: Arc<RealtimeManager>,
    fallback: Fallback,
    ack_deadline: Duration,
    pump: tokio::task::JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the pump task over the connection's inbound channel.
    pub fn spawn(
        realtime: Arc<RealtimeManager>,
        inbound_rx: mpsc::Receiver<Frame>,
        fallback: Fallback,
        ack_deadline: Duration,
    ) -> Self {
        let registry = Arc::new(Registry {
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        });
        let pump = tokio::spawn(pump_loop(Arc::clone(&registry), inbound_rx));
        Self {
            registry,
            realtime,
            fallback,
            ack_deadline,
            pump,
        }
    }

    /// Register a handler for one frame kind. Multiple subscribers per
    /// kind fan out; dropping the returned guard unsubscribes.
    pub fn subscribe(&self, kind: FrameKind, handler: Handler) -> Subscription {
        let id = self.registry.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, handler.into()));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Send a chat message, preferring the realtime channel.
    ///
    /// Resolves with the acknowledged payload if the server echoes our
    /// correlation id before the deadline; otherwise — or when the
    /// connection isn't up — resolves via the fallback path. Settles
    /// exactly once, never hangs.
    pub async fn send(&self, message: OutboundMessage) -> Result<Delivery, SendError> {
        let Some(outbound) = self.realtime.outbound() else {
            return self.send_fallback(message).await;
        };

        let correlation_id = Uuid::new_v4().to_string();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.registry
            .pending
            .lock()
            .insert(correlation_id.clone(), ack_tx);

        let frame = Frame::message(serde_json::json!({
            "correlation_id": correlation_id,
            "conversation_id": message.conversation_id,
            "body": message.body,
        }));
        if outbound.try_send(frame).is_err() {
            // Connection went away between the state check and the send.
            self.registry.pending.lock().remove(&correlation_id);
            return self.send_fallback(message).await;
        }

        match tokio::time::timeout(self.ack_deadline, ack_rx).await {
            Ok(Ok(payload)) => Ok(Delivery::Realtime(payload)),
            // Deadline elapsed, or the pump dropped our sender: withdraw
            // the pending entry and fall back.
            Ok(Err(_)) | Err(_) => {
                self.registry.pending.lock().remove(&correlation_id);
                tracing::debug!(%correlation_id, "no realtime ack, falling back");
                self.send_fallback(message).await
            }
        }
    }

    /// Fire-and-forget typing signal. Only emitted while connected; never
    /// retried, never guaranteed delivered.
    pub fn send_typing(&self, signal: TypingSignal) {
        let Some(outbound) = self.realtime.outbound() else {
            return;
        };
        let frame = Frame::typing(serde_json::json!({
            "conversation_id": signal.conversation_id,
            "typing": signal.typing,
        }));
        if outbound.try_send(frame).is_err() {
            tracing::debug!("typing signal dropped");
        }
    }

    async fn send_fallback(&self, message: OutboundMessage) -> Result<Delivery, SendError> {
        (self.fallback)(message).await.map(Delivery::Fallback)
    }

    /// Stop the pump task. Pending sends settle via their deadlines.
    pub fn shutdown(&self) {
        self.pump.abort();
    }
}

async fn pump_loop(registry: Arc<Registry>, mut inbound_rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = inbound_rx.recv().await {
        match frame.classify() {
            Some(FrameKind::Message) => {
                if let Some(correlation_id) = frame.correlation_id() {
                    match registry.pending.lock().remove(correlation_id) {
                        Some(ack_tx) => {
                            let _ = ack_tx.send(frame.payload.clone());
                        }
                        // Already resolved (or never ours): a duplicate
                        // correlation id has no further effect.
                        None => {
                            tracing::debug!(%correlation_id, "ignoring duplicate or unknown ack");
                        }
                    }
                }
                registry.fan_out(FrameKind::Message, &frame.payload);
            }
            Some(FrameKind::Typing) => {
                registry.fan_out(FrameKind::Typing, &frame.payload);
            }
            None => {
                tracing::debug!(kind = %frame.kind, "dropping frame of unrecognized kind");
            }
        }
    }
}
