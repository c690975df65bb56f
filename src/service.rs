//! Session-scoped notification service.
//!
//! Composes the store, the connection manager, the API client and the session
//! credential into the single object consumers talk to. Create one per
//! authenticated session and call [`NotificationService::logout`] to end it.

// Rust guideline compliant 2026-02

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{HistoryScope, HttpNotificationApi, NotificationApi};
use crate::channel::{ConnectionState, HubTransportFactory, TransportFactory};
use crate::config::Config;
use crate::constants::{ADMIN_EVENT, AUTH_RETRY_DELAY, NOTIFICATION_CAPACITY, STUDENT_EVENT};
use crate::credentials::{CredentialSource, SessionCredentials};
use crate::manager::{ConnectionManager, StartOutcome};
use crate::notification::{Notification, NotificationType};
use crate::store::{NotificationStore, ReadOutcome};

/// Notification engine for one authenticated session.
#[derive(Debug)]
pub struct NotificationService {
    credentials: SessionCredentials,
    api: Arc<dyn NotificationApi>,
    store: Arc<NotificationStore>,
    manager: ConnectionManager,
}

impl NotificationService {
    /// Build the service against the HTTP backend and hub named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &Config, credentials: SessionCredentials) -> Result<Self> {
        let source: Arc<dyn CredentialSource> = Arc::new(credentials.clone());
        let api = Arc::new(HttpNotificationApi::new(config.api_url.clone(), source)?);
        let factory = Arc::new(HubTransportFactory::new(
            config.hub_url.clone(),
            config.reconnect_policy(),
        ));
        let manager = ConnectionManager::with_auth_retry_delay(
            Arc::new(credentials.clone()),
            factory,
            config.auth_retry_delay(),
        );
        Ok(Self::from_parts(credentials, api, manager, config.capacity))
    }

    /// Build the service from injected collaborators.
    pub fn with_collaborators(
        credentials: SessionCredentials,
        api: Arc<dyn NotificationApi>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let manager = ConnectionManager::with_auth_retry_delay(
            Arc::new(credentials.clone()),
            factory,
            AUTH_RETRY_DELAY,
        );
        Self::from_parts(credentials, api, manager, NOTIFICATION_CAPACITY)
    }

    fn from_parts(
        credentials: SessionCredentials,
        api: Arc<dyn NotificationApi>,
        manager: ConnectionManager,
        capacity: usize,
    ) -> Self {
        let store = Arc::new(NotificationStore::new(capacity, Arc::clone(&api)));

        for event in [STUDENT_EVENT, ADMIN_EVENT] {
            let store = Arc::clone(&store);
            manager.on(
                event,
                Arc::new(move |message: String| store.ingest_push(event, message)),
            );
        }

        Self {
            credentials,
            api,
            store,
            manager,
        }
    }

    /// Connect (if a credential is present) and load history.
    pub async fn connect(&self) -> StartOutcome {
        let outcome = self.manager.ensure_connected().await;
        if outcome != StartOutcome::NoCredential {
            self.load_history().await;
        }
        outcome
    }

    /// Load the role-selected history into the store.
    ///
    /// Returns `true` when a snapshot was applied. Failures are logged and
    /// leave the store untouched.
    pub async fn load_history(&self) -> bool {
        let roles = self.credentials.roles();
        let Some(scope) = HistoryScope::for_roles(&roles) else {
            log::info!("[Service] No portal role in credential, skipping history ({:?})", roles);
            return false;
        };

        let ticket = self.store.begin_history_load();
        match self.api.fetch_history(scope).await {
            Ok(records) => self.store.apply_history(ticket, records),
            Err(e) => {
                log::error!("[Service] Failed to load {:?} history: {:#}", scope, e);
                false
            }
        }
    }

    /// Optimistically mark one notification read.
    pub async fn mark_as_read(&self, id: &str) -> ReadOutcome {
        self.store.mark_as_read(id).await
    }

    /// Optimistically mark every notification read.
    pub async fn mark_all_as_read(&self) -> ReadOutcome {
        self.store.mark_all_as_read().await
    }

    /// Dismiss one entry locally.
    pub fn remove_at(&self, index: usize) -> Option<Notification> {
        self.store.remove_at(index)
    }

    /// Dismiss every entry locally.
    pub fn clear_all(&self) {
        self.store.clear_all();
    }

    /// Add a locally originated notification.
    pub fn add(&self, kind: NotificationType, message: impl Into<String>) {
        self.store.add(kind, message);
    }

    /// Add a local `success` notification.
    pub fn add_success(&self, message: impl Into<String>) {
        self.add(NotificationType::Success, message);
    }

    /// Add a local `info` notification.
    pub fn add_info(&self, message: impl Into<String>) {
        self.add(NotificationType::Info, message);
    }

    /// Add a local `warning` notification.
    pub fn add_warning(&self, message: impl Into<String>) {
        self.add(NotificationType::Warning, message);
    }

    /// Add a local `error` notification.
    pub fn add_error(&self, message: impl Into<String>) {
        self.add(NotificationType::Error, message);
    }

    /// Current list, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.store.snapshot()
    }

    /// Live view of the list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.store.subscribe()
    }

    /// Current number of unread notifications.
    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    /// Live view of the unread count.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.store.watch_unread()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Live view of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Live connected / not-connected status.
    pub fn watch_status(&self) -> watch::Receiver<bool> {
        self.manager.watch_status()
    }

    /// Rebuild the connection, e.g. after the credential's roles changed.
    pub async fn restart(&self) -> StartOutcome {
        self.manager.restart().await
    }

    /// End the session: disconnect, drop every notification, forget the token.
    pub async fn logout(&self) {
        self.manager.stop().await;
        self.store.clear_all();
        self.credentials.clear();
        log::info!("[Service] Session ended");
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// The underlying connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}
