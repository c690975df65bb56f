//! Portal Notify - real-time notification engine for the exam portal.
//!
//! Keeps a live, capacity-bounded notification list in sync with the portal:
//! pushes arrive over an auto-reconnecting hub connection, history comes from
//! the REST backend, and read state is updated optimistically with rollback.
//!
//! # Architecture
//!
//! - **Store** - Single source of truth, published through `watch` channels
//! - **Connection Manager** - Transport lifecycle, epochs, authentication retry
//! - **Channel** - Push transport trait and the hub WebSocket implementation
//! - **API** - Role-selected history fetch and read confirmation
//! - **Service** - Session-scoped composition of all of the above
//!
//! # Modules
//!
//! - [`store`] - Notification store
//! - [`manager`] - Connection manager
//! - [`channel`] - Push transport
//! - [`config`] - Configuration loading/saving

// Rust guideline compliant 2026-02

pub mod api;
pub mod channel;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod manager;
pub mod notification;
pub mod service;
pub mod store;
pub mod ws;

pub use api::{HistoryScope, HttpNotificationApi, NotificationApi};
pub use channel::{
    ConnectionState, HubConnection, HubTransportFactory, LifecycleHooks, PushTransport,
    ReconnectPolicy, TransportError, TransportFactory,
};
pub use config::Config;
pub use credentials::{CredentialSource, Role, SessionCredentials};
pub use manager::{ConnectionManager, StartOutcome};
pub use notification::{classify_message, Notification, NotificationType};
pub use service::NotificationService;
pub use store::{NotificationStore, ReadOutcome};
