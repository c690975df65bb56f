//! Connection manager.
//!
//! Owns the push transport's lifecycle: one transport per connection epoch,
//! a published [`ConnectionState`], and the single authentication retry.
//!
//! # State machine
//!
//! ```text
//! Disconnected ──start()──► Connecting ──open ok──► Connected
//!      ▲                        │                     │   ▲
//!      │◄────── open failed ────┘        reconnecting │   │ reconnected
//!      │                                              ▼   │
//!      │◄──────────── closed(reason) / stop() ──── Reconnecting
//! ```
//!
//! Every `start()` and `stop()` bumps the epoch. Lifecycle hooks capture the
//! epoch they were created for and are ignored once it is stale, which also
//! cancels a pending authentication retry.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

use crate::channel::{ConnectionState, LifecycleHooks, MessageHandler, PushTransport, TransportFactory};
use crate::constants::AUTH_RETRY_DELAY;
use crate::credentials::{self, CredentialSource};

/// Result of [`ConnectionManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The transport opened; state is `Connected`.
    Started,
    /// A connection is already connecting, connected or reconnecting.
    AlreadyActive,
    /// No credential is available; nothing was attempted.
    NoCredential,
    /// The transport failed to open; state is back to `Disconnected`.
    Failed,
    /// `stop()` was called while the transport was opening.
    Cancelled,
}

/// Whether a close reason means the credential was rejected.
pub fn is_auth_failure(reason: &str) -> bool {
    reason.contains("401") || reason.contains("Unauthorized")
}

#[derive(Debug, Default)]
struct Slot {
    epoch: u64,
    transport: Option<Arc<dyn PushTransport>>,
}

struct Inner {
    credentials: Arc<dyn CredentialSource>,
    factory: Arc<dyn TransportFactory>,
    subscriptions: Mutex<Vec<(String, MessageHandler)>>,
    auth_retry_delay: Duration,
    slot: Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
    connected: watch::Sender<bool>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("factory", &self.factory)
            .field("state", &*self.state.borrow())
            .field("auth_retry_delay", &self.auth_retry_delay)
            .finish_non_exhaustive()
    }
}

/// Lifecycle owner for the push channel. Cloning shares the same manager.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Manager creating transports with `factory`, authenticated by `credentials`.
    pub fn new(credentials: Arc<dyn CredentialSource>, factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_auth_retry_delay(credentials, factory, AUTH_RETRY_DELAY)
    }

    /// Like [`Self::new`] with a custom authentication retry delay.
    pub fn with_auth_retry_delay(
        credentials: Arc<dyn CredentialSource>,
        factory: Arc<dyn TransportFactory>,
        auth_retry_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                credentials,
                factory,
                subscriptions: Mutex::new(Vec::new()),
                auth_retry_delay,
                slot: Mutex::new(Slot::default()),
                state,
                connected,
            }),
        }
    }

    /// Subscribe `handler` to `event` on the current and every future transport.
    pub fn on(&self, event: &str, handler: MessageHandler) {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), Arc::clone(&handler)));

        let current = self.lock_slot().transport.clone();
        if let Some(transport) = current {
            transport.on(event, handler);
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Live view of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Live connected / not-connected status.
    pub fn watch_status(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Open a new connection if disconnected and a credential is present.
    pub async fn start(&self) -> StartOutcome {
        if self.inner.credentials.token().is_none() {
            log::warn!("[Connection] No credential available, not connecting");
            return StartOutcome::NoCredential;
        }

        let (epoch, transport) = {
            let mut slot = self.lock_slot();
            if self.state() != ConnectionState::Disconnected {
                log::debug!("[Connection] start() ignored, state is {}", self.state());
                return StartOutcome::AlreadyActive;
            }
            slot.epoch += 1;
            let transport = self.inner.factory.create(self.hooks_for(slot.epoch));
            let subscriptions = self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for (event, handler) in subscriptions {
                transport.on(&event, handler);
            }
            slot.transport = Some(Arc::clone(&transport));
            self.set_state(ConnectionState::Connecting);
            (slot.epoch, transport)
        };

        let result = transport
            .open(credentials::factory(Arc::clone(&self.inner.credentials)))
            .await;

        let current = {
            let mut slot = self.lock_slot();
            let current = slot.epoch == epoch;
            if current {
                match &result {
                    // Hooks may already have moved the state on
                    Ok(()) if self.state() == ConnectionState::Connecting => {
                        self.set_state(ConnectionState::Connected);
                    }
                    Ok(()) => {}
                    Err(_) => {
                        slot.transport = None;
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
            }
            current
        };

        match result {
            Ok(()) if current => {
                log::info!("[Connection] Connected");
                StartOutcome::Started
            }
            Ok(()) => {
                log::debug!("[Connection] Stopped while connecting, closing transport");
                transport.close().await;
                StartOutcome::Cancelled
            }
            Err(e) if current => {
                log::error!("[Connection] Failed to connect: {}", e);
                StartOutcome::Failed
            }
            Err(e) => {
                log::debug!("[Connection] Open aborted by stop(): {}", e);
                StartOutcome::Cancelled
            }
        }
    }

    /// Close the connection and settle on `Disconnected`. Idempotent.
    ///
    /// Also cancels a pending authentication retry.
    pub async fn stop(&self) {
        let transport = {
            let mut slot = self.lock_slot();
            slot.epoch += 1;
            let transport = slot.transport.take();
            if transport.is_none() && self.state() == ConnectionState::Disconnected {
                return;
            }
            self.set_state(ConnectionState::Disconnected);
            transport
        };

        if let Some(transport) = transport {
            transport.close().await;
        }
        log::info!("[Connection] Stopped");
    }

    /// Stop when the credential is gone, otherwise connect if not connected.
    pub async fn ensure_connected(&self) -> StartOutcome {
        if self.inner.credentials.token().is_none() {
            self.stop().await;
            return StartOutcome::NoCredential;
        }
        if self.state() == ConnectionState::Connected {
            return StartOutcome::AlreadyActive;
        }
        self.start().await
    }

    /// Tear the transport down and build a fresh one.
    pub async fn restart(&self) -> StartOutcome {
        self.stop().await;
        self.start().await
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        set_state(&self.inner, next);
    }

    fn hooks_for(&self, epoch: u64) -> LifecycleHooks {
        let reconnecting = Arc::downgrade(&self.inner);
        let reconnected = Arc::downgrade(&self.inner);
        let closed = Arc::downgrade(&self.inner);

        LifecycleHooks::new()
            .on_reconnecting(move |reason| {
                with_current(&reconnecting, epoch, |inner, _slot| {
                    log::warn!(
                        "[Connection] Reconnecting: {}",
                        reason.as_deref().unwrap_or("connection lost")
                    );
                    set_state(inner, ConnectionState::Reconnecting);
                });
            })
            .on_reconnected(move || {
                with_current(&reconnected, epoch, |inner, _slot| {
                    log::info!("[Connection] Reconnected");
                    set_state(inner, ConnectionState::Connected);
                });
            })
            .on_closed(move |reason| {
                let weak = closed.clone();
                with_current(&closed, epoch, |inner, slot| {
                    slot.transport = None;
                    set_state(inner, ConnectionState::Disconnected);
                    match reason.as_deref() {
                        Some(reason) if is_auth_failure(reason) => {
                            log::warn!(
                                "[Connection] Closed, credential rejected: {}. Retrying in {:?}",
                                reason,
                                inner.auth_retry_delay
                            );
                            schedule_auth_retry(weak, epoch, inner.auth_retry_delay);
                        }
                        Some(reason) => log::error!("[Connection] Closed with error: {}", reason),
                        None => log::info!("[Connection] Closed"),
                    }
                });
            })
    }
}

/// Run `f` if the manager is alive and `epoch` is still current.
fn with_current(weak: &Weak<Inner>, epoch: u64, f: impl FnOnce(&Inner, &mut Slot)) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut slot = inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.epoch != epoch {
        log::trace!("[Connection] Ignoring event from stale epoch {}", epoch);
        return;
    }
    f(&inner, &mut slot);
}

fn set_state(inner: &Inner, next: ConnectionState) {
    let previous = inner.state.send_replace(next);
    if previous != next {
        log::debug!("[Connection] {} -> {}", previous, next);
    }
    inner.connected.send_if_modified(|connected| {
        let now = next == ConnectionState::Connected;
        let changed = *connected != now;
        *connected = now;
        changed
    });
}

/// Retry `start()` once after `delay`, unless the epoch moves on first.
fn schedule_auth_retry(weak: Weak<Inner>, epoch: u64, delay: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        log::warn!("[Connection] No runtime available, authentication retry skipped");
        return;
    };

    handle.spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let still_current = inner.slot.lock().unwrap_or_else(PoisonError::into_inner).epoch == epoch;
        if !still_current {
            log::debug!("[Connection] Authentication retry cancelled");
            return;
        }
        log::info!("[Connection] Retrying after authentication failure");
        let outcome = ConnectionManager { inner }.start().await;
        log::debug!("[Connection] Authentication retry finished: {:?}", outcome);
    });
}
