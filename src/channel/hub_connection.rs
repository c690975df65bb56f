//! Auto-reconnecting notification hub connection.
//!
//! [`HubConnection`] implements [`PushTransport`] over a WebSocket speaking
//! the JSON hub protocol. `open()` performs the first connect + handshake in
//! the caller's task; once established, a background task owns the socket,
//! dispatches invocations to registered handlers, keeps the connection alive,
//! and reconnects according to the [`ReconnectPolicy`].
//!
//! # Lifecycle
//!
//! ```text
//! open() ──► handshake ──► message loop ──lost──► on_reconnecting
//!                               ▲                      │
//!                               └── on_reconnected ◄── retry (policy)
//!                                                      │
//!                              on_closed(reason) ◄── gave up / 401
//! ```
//!
//! An HTTP 401 during a reconnect attempt ends reconnection immediately:
//! retrying the same rejected token cannot succeed, and the manager owns the
//! authentication retry.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::hub_protocol::{self, HubMessage};
use super::{
    LifecycleHooks, MessageHandler, PushTransport, ReconnectPolicy, TransportError,
    TransportFactory,
};
use crate::constants::{CLOSE_TIMEOUT, HANDSHAKE_TIMEOUT, KEEP_ALIVE_INTERVAL, SERVER_TIMEOUT};
use crate::credentials::CredentialFactory;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Handlers keyed by lowercased event name.
type HandlerMap = Arc<StdRwLock<HashMap<String, Vec<MessageHandler>>>>;

/// WebSocket hub connection with automatic reconnection.
pub struct HubConnection {
    hub_url: String,
    policy: ReconnectPolicy,
    hooks: LifecycleHooks,
    handlers: HandlerMap,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("hub_url", &self.hub_url)
            .field("policy", &self.policy)
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`HubConnection`].
#[derive(Debug)]
pub struct HubConnectionBuilder {
    hub_url: String,
    policy: ReconnectPolicy,
    hooks: LifecycleHooks,
}

impl HubConnectionBuilder {
    /// Set the reconnect schedule.
    #[must_use]
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the connection (not yet opened).
    #[must_use]
    pub fn build(self) -> HubConnection {
        HubConnection {
            hub_url: self.hub_url,
            policy: self.policy,
            hooks: self.hooks,
            handlers: Arc::new(StdRwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

impl HubConnection {
    /// Start building a connection to `hub_url` (`http(s)://` or `ws(s)://`).
    pub fn builder(hub_url: impl Into<String>) -> HubConnectionBuilder {
        HubConnectionBuilder {
            hub_url: hub_url.into(),
            policy: ReconnectPolicy::default(),
            hooks: LifecycleHooks::default(),
        }
    }
}

#[async_trait]
impl PushTransport for HubConnection {
    fn on(&self, event: &str, handler: MessageHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_ascii_lowercase())
            .or_default()
            .push(handler);
    }

    async fn open(&self, credentials: CredentialFactory) -> Result<(), TransportError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(TransportError::ConnectionFailed("already open".to_string()));
        }

        log::info!("[Hub] Connecting to {}", self.hub_url);
        let session = tokio::select! {
            result = establish(&self.hub_url, &credentials) => result?,
            () = self.shutdown.cancelled() => return Err(TransportError::Closed),
        };
        log::info!("[Hub] Connected");

        let ctx = LoopContext {
            hub_url: self.hub_url.clone(),
            policy: self.policy.clone(),
            hooks: self.hooks.clone(),
            handlers: Arc::clone(&self.handlers),
            shutdown: self.shutdown.clone(),
            credentials,
        };
        *task = Some(tokio::spawn(run_connection_loop(ctx, session)));
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                log::warn!("[Hub] Connection task did not stop within {:?}", CLOSE_TIMEOUT);
            }
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Creates a [`HubConnection`] per connection epoch.
#[derive(Debug, Clone)]
pub struct HubTransportFactory {
    hub_url: String,
    policy: ReconnectPolicy,
}

impl HubTransportFactory {
    /// Factory for connections to `hub_url` using `policy`.
    pub fn new(hub_url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            hub_url: hub_url.into(),
            policy,
        }
    }
}

impl TransportFactory for HubTransportFactory {
    fn create(&self, hooks: LifecycleHooks) -> Arc<dyn PushTransport> {
        Arc::new(
            HubConnection::builder(self.hub_url.clone())
                .policy(self.policy.clone())
                .hooks(hooks)
                .build(),
        )
    }
}

/// Everything the background task needs, detached from `HubConnection`.
struct LoopContext {
    hub_url: String,
    policy: ReconnectPolicy,
    hooks: LifecycleHooks,
    handlers: HandlerMap,
    shutdown: CancellationToken,
    credentials: CredentialFactory,
}

/// An established, handshaken socket.
struct Session {
    writer: WsWriter,
    reader: WsReader,
    /// Records that arrived in the same frame as the handshake response.
    backlog: Vec<String>,
}

/// Why the message loop returned.
enum LoopExit {
    /// `close()` was called.
    Shutdown,
    /// The socket failed, ended or went silent.
    Lost(String),
    /// The server sent a close message.
    ServerClosed {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

/// Outcome of the reconnect phase.
enum Reconnect {
    Established(Session),
    GaveUp(String),
    Shutdown,
}

/// Connect, authenticate and complete the hub handshake.
///
/// The token is resolved here, once per attempt. Connect and handshake share
/// one [`HANDSHAKE_TIMEOUT`], so a peer that accepts TCP and then goes silent
/// cannot hold the attempt open.
async fn establish(hub_url: &str, credentials: &CredentialFactory) -> Result<Session, TransportError> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_and_handshake(hub_url, credentials))
        .await
        .map_err(|_elapsed| {
            TransportError::ConnectionFailed(format!(
                "no handshake within {}s",
                HANDSHAKE_TIMEOUT.as_secs()
            ))
        })?
}

async fn connect_and_handshake(
    hub_url: &str,
    credentials: &CredentialFactory,
) -> Result<Session, TransportError> {
    let token = credentials();
    let url = ws::hub_socket_url(hub_url, token.as_deref())?;
    let bearer = token.map(|t| format!("Bearer {t}"));
    let headers: Vec<(&str, &str)> = bearer
        .as_deref()
        .map(|b| ("Authorization", b))
        .into_iter()
        .collect();

    let (mut writer, mut reader) = ws::connect(&url, &headers).await?;
    writer.send_text(hub_protocol::handshake_request()).await?;

    let backlog = wait_for_handshake(&mut writer, &mut reader).await?;

    Ok(Session {
        writer,
        reader,
        backlog,
    })
}

/// Wait for the handshake response, returning any records that followed it.
async fn wait_for_handshake(
    writer: &mut WsWriter,
    reader: &mut WsReader,
) -> Result<Vec<String>, TransportError> {
    while let Some(msg) = reader.recv().await {
        match msg? {
            WsMessage::Text(text) => {
                let mut records = hub_protocol::records(&text);
                let Some(first) = records.next() else {
                    continue;
                };
                hub_protocol::parse_handshake_response(first)?;
                log::debug!("[Hub] Handshake complete");
                return Ok(records.map(str::to_string).collect());
            }
            WsMessage::Ping(data) => writer.send_pong(data).await?,
            WsMessage::Close { code, reason } => {
                return Err(TransportError::Handshake(format!(
                    "socket closed during handshake ({code}) {reason}"
                )));
            }
            WsMessage::Other => {}
        }
    }
    Err(TransportError::Handshake("socket ended before handshake".to_string()))
}

/// Background task: run the message loop, reconnecting until told to stop.
async fn run_connection_loop(ctx: LoopContext, session: Session) {
    let mut session = session;

    loop {
        let exit = run_message_loop(&ctx, &mut session).await;

        let reason = match exit {
            LoopExit::Shutdown => {
                log::info!("[Hub] Shutdown requested, closing connection");
                let _ = session.writer.close().await;
                ctx.hooks.closed(None);
                return;
            }
            LoopExit::ServerClosed {
                error,
                allow_reconnect: false,
            } => {
                log::warn!("[Hub] Server closed the connection: {:?}", error);
                ctx.hooks.closed(error);
                return;
            }
            LoopExit::ServerClosed {
                error,
                allow_reconnect: true,
            } => error.unwrap_or_else(|| "server requested reconnect".to_string()),
            LoopExit::Lost(reason) => reason,
        };

        log::warn!("[Hub] Connection lost: {}", reason);
        ctx.hooks.reconnecting(Some(reason.clone()));

        match reconnect(&ctx, reason).await {
            Reconnect::Established(next) => {
                log::info!("[Hub] Reconnected");
                session = next;
                ctx.hooks.reconnected();
            }
            Reconnect::GaveUp(reason) => {
                log::error!("[Hub] Giving up reconnecting: {}", reason);
                ctx.hooks.closed(Some(reason));
                return;
            }
            Reconnect::Shutdown => {
                log::info!("[Hub] Shutdown during reconnect");
                ctx.hooks.closed(None);
                return;
            }
        }
    }
}

/// Retry per the policy until connected, rejected, exhausted or shut down.
async fn reconnect(ctx: &LoopContext, reason: String) -> Reconnect {
    let mut last_error = reason;
    let mut attempt = 0;

    loop {
        let Some(delay) = ctx.policy.delay_for(attempt) else {
            return Reconnect::GaveUp(last_error);
        };
        attempt += 1;

        log::info!(
            "[Hub] Reconnect attempt {} in {:.1}s",
            attempt,
            delay.as_secs_f32()
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = ctx.shutdown.cancelled() => return Reconnect::Shutdown,
        }

        let result = tokio::select! {
            result = establish(&ctx.hub_url, &ctx.credentials) => result,
            () = ctx.shutdown.cancelled() => return Reconnect::Shutdown,
        };

        match result {
            Ok(session) => return Reconnect::Established(session),
            Err(e) if e.is_unauthorized() => return Reconnect::GaveUp(e.to_string()),
            Err(e) => {
                log::warn!("[Hub] Reconnect attempt {} failed: {}", attempt, e);
                last_error = e.to_string();
            }
        }
    }
}

/// Inner message loop for one socket.
async fn run_message_loop(ctx: &LoopContext, session: &mut Session) -> LoopExit {
    for record in std::mem::take(&mut session.backlog) {
        if let Some(exit) = handle_record(ctx, &record) {
            return exit;
        }
    }

    let mut last_activity = Instant::now();
    let mut keep_alive =
        tokio::time::interval_at(Instant::now() + KEEP_ALIVE_INTERVAL, KEEP_ALIVE_INTERVAL);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => return LoopExit::Shutdown,

            msg = session.reader.recv() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        for record in hub_protocol::records(&text) {
                            if let Some(exit) = handle_record(ctx, record) {
                                return exit;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = session.writer.send_pong(data).await {
                            return LoopExit::Lost(e.to_string());
                        }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        return LoopExit::Lost(format!("WebSocket closed by server ({code}) {reason}"));
                    }
                    Some(Ok(WsMessage::Other)) => {}
                    Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                    None => return LoopExit::Lost("WebSocket stream ended".to_string()),
                }
            }

            // Re-armed every iteration; any inbound frame moves the deadline.
            () = tokio::time::sleep_until(last_activity + SERVER_TIMEOUT) => {
                return LoopExit::Lost(format!(
                    "no message from server for {}s",
                    SERVER_TIMEOUT.as_secs()
                ));
            }

            _ = keep_alive.tick() => {
                if let Err(e) = session.writer.send_text(hub_protocol::ping()).await {
                    return LoopExit::Lost(e.to_string());
                }
            }
        }
    }
}

/// Handle one protocol record. Returns an exit when the server closes.
fn handle_record(ctx: &LoopContext, record: &str) -> Option<LoopExit> {
    let message = match hub_protocol::parse_message(record) {
        Ok(message) => message,
        Err(e) => {
            let preview: String = record.chars().take(100).collect();
            log::warn!("[Hub] Failed to parse record: {} ({})", e, preview);
            return None;
        }
    };

    match message {
        HubMessage::Invocation { target, arguments } => {
            dispatch(&ctx.handlers, &target, &HubMessage::payload(&arguments));
            None
        }
        HubMessage::Ping => None,
        HubMessage::Close {
            error,
            allow_reconnect,
        } => Some(LoopExit::ServerClosed {
            error,
            allow_reconnect,
        }),
        HubMessage::Other(kind) => {
            log::trace!("[Hub] Ignoring message type {}", kind);
            None
        }
    }
}

/// Invoke every handler registered for `target`.
fn dispatch(handlers: &HandlerMap, target: &str, payload: &str) {
    let registered: Vec<MessageHandler> = handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&target.to_ascii_lowercase())
        .cloned()
        .unwrap_or_default();

    if registered.is_empty() {
        log::debug!("[Hub] No handler for event {}", target);
        return;
    }

    log::trace!("[Hub] Dispatching {} to {} handler(s)", target, registered.len());
    for handler in registered {
        handler(payload.to_string());
    }
}
