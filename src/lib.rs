//! tether — session and realtime connection resilience for the portal
//! client.
//!
//! Keeps a bearer credential valid across an unbounded sequence of
//! concurrent requests (refreshing it exactly once however many fail
//! together), expires a session locally after user inactivity, and
//! maintains a best-effort realtime connection that reconnects after
//! drops without duplicating delivered messages.
//!
//! ## Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether::{
//!     AuthClient, ClientConfig, Dispatcher, RealtimeManager, ReconnectPolicy,
//!     RefreshCoordinator, SessionEvents, SessionManager, SessionStore, SessionTimers,
//! };
//!
//! # async fn wire() {
//! let config = ClientConfig::default();
//! let store = Arc::new(SessionStore::new(
//!     SessionStore::default_path(),
//!     config.session_duration(),
//!     config.inactivity_timeout(),
//! ));
//! let events = SessionEvents::new();
//! let refresh = Arc::new(RefreshCoordinator::new(
//!     config.api_url.clone(),
//!     Arc::clone(&store),
//!     events.clone(),
//! ));
//! let manager = SessionManager::new(
//!     AuthClient::new(config.api_url.clone()),
//!     Arc::clone(&store),
//!     events.clone(),
//!     Arc::clone(&refresh),
//!     SessionTimers::default(),
//! );
//!
//! let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(tether::INBOUND_CAPACITY);
//! let realtime = Arc::new(RealtimeManager::new(
//!     config.realtime_url.clone(),
//!     ReconnectPolicy::default(),
//!     inbound_tx,
//! ));
//! let fallback: tether::Fallback = Arc::new(|message| {
//!     Box::pin(async move {
//!         // POST the message through the request-based API here.
//!         Ok(serde_json::json!({ "body": message.body }))
//!     })
//! });
//! let dispatcher = Dispatcher::spawn(
//!     Arc::clone(&realtime),
//!     inbound_rx,
//!     fallback,
//!     config.ack_deadline(),
//! );
//!
//! let login = manager.login("me@example.com", "secret").await.unwrap();
//! realtime.connect(&login.identity);
//! # let _ = dispatcher;
//! # }
//! ```

pub mod activity;
pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod protocol;
pub mod refresh;
pub mod session;

pub use activity::{IdleMonitor, Interaction};
pub use auth::{AuthClient, LoginResponse, SessionManager, SessionTimers, ValidateResponse};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionState, RealtimeManager, ReconnectPolicy};
pub use dispatch::{Delivery, Dispatcher, Fallback, Subscription, INBOUND_CAPACITY};
pub use error::{AuthError, RefreshError, SendError};
pub use events::{LogoutReason, SessionEvent, SessionEvents};
pub use protocol::{Frame, FrameKind, OutboundMessage, TypingSignal};
pub use refresh::{ProactiveRefresh, RefreshCoordinator};
pub use session::{Role, SessionRecord, SessionStatus, SessionStore};
