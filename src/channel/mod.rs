//! Push channel abstraction.
//!
//! This module provides the [`PushTransport`] trait the connection manager
//! drives, plus the vocabulary shared by every transport: connection state,
//! lifecycle hooks, the reconnect schedule and transport errors.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager
//!     │ TransportFactory::create(hooks)
//!     ▼
//! PushTransport (trait)
//!     │
//!     └── HubConnection
//!         ├── WebSocket (ws.rs, tokio-tungstenite)
//!         ├── JSON hub protocol (hub_protocol.rs)
//!         └── Reconnection (ReconnectPolicy)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let transport = HubConnection::builder("https://portal.example/notificationHub")
//!     .hooks(hooks)
//!     .build();
//! transport.on("ReceiveMessage", Arc::new(|msg| println!("{msg}")));
//! transport.open(credentials::factory(source)).await?;
//! // ...
//! transport.close().await;
//! ```
//!
//! The credential factory is called on every connect attempt, including each
//! automatic reconnect. Lifecycle hooks are fixed at construction and survive
//! reconnect cycles.

// Rust guideline compliant 2026-02

pub mod hub_connection;
pub mod hub_protocol;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::CredentialFactory;

/// Connection state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Connected and receiving pushes.
    Connected,
    /// Connection lost; the transport is retrying.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to establish or keep the connection.
    ConnectionFailed(String),
    /// The server refused the credential.
    Unauthorized(String),
    /// The hub handshake failed or timed out.
    Handshake(String),
    /// The transport was closed.
    Closed,
}

impl TransportError {
    /// Whether this error means the credential was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::Unauthorized(msg) => write!(f, "401 Unauthorized: {msg}"),
            Self::Handshake(msg) => write!(f, "Handshake failed: {msg}"),
            Self::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Handler invoked once per inbound message for one event name.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

type ReasonCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;
type PlainCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle callbacks registered once, at transport construction.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_reconnecting: Option<ReasonCallback>,
    on_reconnected: Option<PlainCallback>,
    on_closed: Option<ReasonCallback>,
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_reconnecting", &self.on_reconnecting.is_some())
            .field("on_reconnected", &self.on_reconnected.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}

impl LifecycleHooks {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when an established connection is lost and retries begin.
    #[must_use]
    pub fn on_reconnecting(mut self, f: impl Fn(Option<String>) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(f));
        self
    }

    /// Called when a retry succeeds.
    #[must_use]
    pub fn on_reconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnected = Some(Arc::new(f));
        self
    }

    /// Called once when the transport stops for good, with the error if any.
    #[must_use]
    pub fn on_closed(mut self, f: impl Fn(Option<String>) + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(f));
        self
    }

    /// Fire the reconnecting hook.
    pub fn reconnecting(&self, reason: Option<String>) {
        if let Some(f) = &self.on_reconnecting {
            f(reason);
        }
    }

    /// Fire the reconnected hook.
    pub fn reconnected(&self) {
        if let Some(f) = &self.on_reconnected {
            f();
        }
    }

    /// Fire the closed hook.
    pub fn closed(&self, reason: Option<String>) {
        if let Some(f) = &self.on_closed {
            f(reason);
        }
    }
}

/// Delay schedule for automatic reconnection.
///
/// Attempt `n` waits `delays[n]`. Past the end of the schedule the last delay
/// repeats when holding, otherwise reconnection gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    hold_last: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_RECONNECT_DELAYS_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

impl ReconnectPolicy {
    /// Schedule that holds its last delay forever.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            hold_last: true,
        }
    }

    /// Schedule that gives up after its last delay.
    pub fn bounded(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            hold_last: false,
        }
    }

    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self::bounded(Vec::new())
    }

    /// Delay before attempt `attempt` (0-based), or `None` to give up.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        match self.delays.get(attempt) {
            Some(delay) => Some(*delay),
            None if self.hold_last => self.delays.last().copied(),
            None => None,
        }
    }
}

/// A persistent, auto-reconnecting push channel.
///
/// Handlers registered with [`Self::on`] persist across reconnects.
#[async_trait]
pub trait PushTransport: Send + Sync + std::fmt::Debug {
    /// Register `handler` for messages named `event`.
    fn on(&self, event: &str, handler: MessageHandler);

    /// Establish the channel, presenting the token `credentials` yields now.
    ///
    /// A failure here is final for this transport; automatic reconnection
    /// only applies to connections that were established once.
    async fn open(&self, credentials: CredentialFactory) -> Result<(), TransportError>;

    /// Terminate the channel. Safe to call repeatedly.
    async fn close(&self);
}

/// Builds a fresh transport for each connection epoch.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Create a transport wired to `hooks`.
    fn create(&self, hooks: LifecycleHooks) -> Arc<dyn PushTransport>;
}

pub use hub_connection::{HubConnection, HubConnectionBuilder, HubTransportFactory};
