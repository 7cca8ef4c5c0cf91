//! SessionManager - owns the one live session and keeps it alive.
//!
//! # Lifecycle
//!
//! [`SessionManager::start`] loads credentials, opens a connection, and (for
//! an unregistered device) runs the pairing-code flow. From then on the
//! connection's events drive the state machine:
//!
//! - `open`: the session becomes usable
//! - `close` with a transient reason: the handle is discarded and `start`
//!   runs again after `reconnect_delay`
//! - `close` with `loggedOut`: the handle is discarded and nothing is retried
//!
//! # Single flight
//!
//! `start` is serialized. A caller that finds a session already connecting,
//! pairing or connected gets that session's handle back instead of a second
//! connection. Any `start` also cancels a scheduled retry.

use super::state::{ConnectionState, Session, SessionId};
use crate::address;
use crate::credentials::{AuthState, CredentialError, CredentialStore};
use crate::event_bus::{EventBus, PAIRING_CODE, SESSION_STATE};
use crate::pairing::{format_pairing_code, sanitize_phone_number, PairingError, PairingInput};
use crate::protocol::{
    disconnect_reason, BrowserIdentity, ClientEvent, ConnectConfig, ConnectionPhase,
    ConnectionUpdate, Connector, DisconnectClass, MessageContent, ProtocolError, ProtocolHandle,
};
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Tunables for the session lifecycle.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Fixed delay before reconnecting after a transient disconnect.
    pub reconnect_delay: Duration,
    pub browser: BrowserIdentity,
    /// Treat disconnect codes outside the known set as transient.
    pub retry_unrecognized_disconnects: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            browser: BrowserIdentity::default(),
            retry_unrecognized_disconnects: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to load credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Failed to connect: {0}")]
    Connect(ProtocolError),

    #[error("Pairing failed: {0}")]
    Pairing(#[from] PairingError),

    #[error("Failed to request pairing code: {0}")]
    PairingCode(ProtocolError),

    #[error("Session is not connected")]
    NotConnected,

    #[error("{0}")]
    Send(ProtocolError),
}

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    /// Last known credentials; `creds.update` merges into this.
    auth: Option<AuthState>,
    retry: Option<JoinHandle<()>>,
}

/// Owns the session handle, its connection state and the reconnect policy.
pub struct SessionManager {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    pairing_input: Arc<dyn PairingInput>,
    event_bus: Arc<EventBus>,
    inner: Mutex<Inner>,
    /// Written only while `inner` is locked, so it always agrees with `inner.session`.
    state: watch::Sender<ConnectionState>,
    start_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        pairing_input: Arc<dyn PairingInput>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            credentials,
            pairing_input,
            event_bus,
            inner: Mutex::new(Inner::default()),
            state,
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The connectivity flag: a session exists and has seen `open` since it was created.
    pub fn is_connected(&self) -> bool {
        self.lock_inner()
            .session
            .as_ref()
            .is_some_and(|session| session.opened)
    }

    pub fn has_pending_retry(&self) -> bool {
        self.lock_inner()
            .retry
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn current_handle(&self) -> Option<Arc<dyn ProtocolHandle>> {
        self.lock_inner()
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.handle))
    }

    /// Canonicalize a protocol-internal address, see [`address::decode_address`].
    pub fn decode_address(&self, raw: &str) -> String {
        address::decode_address(raw)
    }

    /// Establish the session, or join the one already underway.
    ///
    /// A failure leaves the manager disconnected and is not retried here.
    pub async fn start(self: &Arc<Self>) -> Result<Arc<dyn ProtocolHandle>, SessionError> {
        self.cancel_pending_retry();
        let _attempt = self.start_lock.lock().await;

        if let Some(handle) = self.current_handle() {
            log::debug!("Session already {}, reusing it", self.state());
            return Ok(handle);
        }

        {
            let _inner = self.lock_inner();
            self.set_state(ConnectionState::Connecting);
        }

        match self.establish().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                log::error!("Connection error: {}", e);
                self.abandon_attempt().await;
                Err(e)
            }
        }
    }

    /// Wait until the current attempt opens or settles otherwise.
    ///
    /// Returns true only if the session is connected before `timeout`. A
    /// disconnected or logged-out manager returns false immediately.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let mut state = self.state.subscribe();
        let settled = tokio::time::timeout(timeout, async move {
            state
                .wait_for(|state| !state.is_in_progress())
                .await
                .map(|state| *state)
        })
        .await;

        matches!(settled, Ok(Ok(ConnectionState::Connected)))
    }

    /// Send a text message through the current handle.
    ///
    /// Holds its own reference to the handle, so a concurrent replacement
    /// makes this call fail rather than panic.
    pub async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError> {
        let handle = self.current_handle().ok_or(SessionError::NotConnected)?;
        handle
            .send_message(jid, MessageContent::text(text))
            .await
            .map_err(SessionError::Send)
    }

    async fn establish(self: &Arc<Self>) -> Result<Arc<dyn ProtocolHandle>, SessionError> {
        let auth = self.credentials.load()?;
        let registered = auth.is_registered();

        let connection = self
            .connector
            .connect(ConnectConfig {
                creds: auth.creds.clone(),
                browser: self.config.browser.clone(),
            })
            .await
            .map_err(SessionError::Connect)?;

        let session = Session::new(Arc::clone(&connection.handle));
        let session_id = session.id.clone();
        let handle = Arc::clone(&session.handle);
        {
            let mut inner = self.lock_inner();
            inner.session = Some(session);
            inner.auth = Some(auth);
        }
        log::info!("Session {} created", session_id);

        self.spawn_listener(session_id.clone(), connection.events);

        if !registered {
            self.pair(&session_id, &handle).await?;
        }

        Ok(handle)
    }

    async fn pair(
        &self,
        session_id: &SessionId,
        handle: &Arc<dyn ProtocolHandle>,
    ) -> Result<(), SessionError> {
        {
            let inner = self.lock_inner();
            let current = inner.session.as_ref().is_some_and(|s| &s.id == session_id);
            if current && self.state() == ConnectionState::Connecting {
                self.set_state(ConnectionState::Pairing);
            }
        }

        let raw = self.pairing_input.phone_number().await?;
        let phone_number = sanitize_phone_number(&raw)?;
        let code = handle
            .request_pairing_code(&phone_number)
            .await
            .map_err(SessionError::PairingCode)?;
        let code = format_pairing_code(&code);

        log::info!("Pairing code for {}: {}", phone_number, code);
        self.event_bus.emit(
            PAIRING_CODE,
            &json!({ "code": code, "phoneNumber": phone_number }),
        );
        Ok(())
    }

    /// Drop whatever a failed `start` left behind.
    async fn abandon_attempt(&self) {
        let session = {
            let mut inner = self.lock_inner();
            let session = inner.session.take();
            // An `open` may have landed mid-pairing; the state must not outlive the session.
            if session.is_some() || self.state().is_in_progress() {
                self.set_state(ConnectionState::Disconnected);
            }
            session
        };
        if let Some(session) = session {
            session.handle.end().await;
        }
    }

    fn spawn_listener(
        self: &Arc<Self>,
        session_id: SessionId,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.handle_event(&session_id, event).await;
            }

            if let Some(manager) = manager.upgrade() {
                manager.handle_stream_end(&session_id).await;
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, session_id: &SessionId, event: ClientEvent) {
        match event {
            ClientEvent::CredsUpdate(update) => self.persist_creds(&update),
            ClientEvent::ConnectionUpdate(update) => match update.connection {
                Some(ConnectionPhase::Open) => self.on_open(session_id),
                Some(ConnectionPhase::Close) => self.on_close(session_id, &update).await,
                Some(ConnectionPhase::Connecting) | None => {}
            },
        }
    }

    /// Credentials are account-wide, so updates from any connection are kept.
    fn persist_creds(&self, update: &serde_json::Value) {
        let snapshot = {
            let mut inner = self.lock_inner();
            let auth = inner.auth.get_or_insert_with(AuthState::empty);
            if let Err(e) = auth.merge(update) {
                log::error!("Ignoring credential update: {}", e);
                return;
            }
            auth.clone()
        };

        if let Err(e) = self.credentials.save(&snapshot) {
            log::error!("Failed to save credentials: {}", e);
        }
    }

    fn on_open(&self, session_id: &SessionId) {
        let mut inner = self.lock_inner();
        match inner.session.as_mut() {
            Some(session) if &session.id == session_id => {
                session.opened = true;
                self.set_state(ConnectionState::Connected);
                log::info!("Session {} connected", session_id);
            }
            _ => log::debug!("Ignoring open from stale session {}", session_id),
        }
    }

    async fn on_close(self: &Arc<Self>, session_id: &SessionId, update: &ConnectionUpdate) {
        let code = update.disconnect_code();
        let reason = update.disconnect_message().unwrap_or("no reason given");

        let session = {
            let mut inner = self.lock_inner();
            if inner.session.as_ref().map(|s| &s.id) != Some(session_id) {
                log::debug!("Ignoring close from stale session {}", session_id);
                return;
            }
            let session = inner.session.take();
            if let Some(closed) = &session {
                log::info!(
                    "Session {} closed after {}s",
                    closed.id,
                    (Utc::now() - closed.created_at).num_seconds()
                );
            }

            match DisconnectClass::classify(code) {
                DisconnectClass::Recoverable => {
                    log::warn!(
                        "Connection closed ({}: {}), reconnecting in {:?}",
                        code,
                        reason,
                        self.config.reconnect_delay
                    );
                    self.set_state(ConnectionState::Disconnected);
                    self.schedule_retry(&mut inner);
                }
                DisconnectClass::Terminal => {
                    log::error!(
                        "Logged out ({}: {}); pair the device again to reconnect",
                        code,
                        reason
                    );
                    self.set_state(ConnectionState::LoggedOut);
                }
                DisconnectClass::Unrecognized if self.config.retry_unrecognized_disconnects => {
                    log::warn!(
                        "Connection closed with unrecognized reason ({}: {}), reconnecting in {:?}",
                        code,
                        reason,
                        self.config.reconnect_delay
                    );
                    self.set_state(ConnectionState::Disconnected);
                    self.schedule_retry(&mut inner);
                }
                DisconnectClass::Unrecognized => {
                    log::warn!(
                        "Connection closed with unrecognized reason ({}: {}), not reconnecting",
                        code,
                        reason
                    );
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            session
        };

        if let Some(session) = session {
            session.handle.end().await;
        }
    }

    /// The client went away without reporting a close.
    async fn handle_stream_end(self: &Arc<Self>, session_id: &SessionId) {
        let current = self
            .lock_inner()
            .session
            .as_ref()
            .is_some_and(|s| &s.id == session_id);
        if current {
            let update = ConnectionUpdate::close(
                disconnect_reason::CONNECTION_LOST,
                "protocol client event stream ended",
            );
            self.on_close(session_id, &update).await;
        }
    }

    fn schedule_retry(self: &Arc<Self>, inner: &mut Inner) {
        let manager = Arc::downgrade(self);
        let delay = self.config.reconnect_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            manager.lock_inner().retry.take();
            if let Err(e) = manager.start().await {
                log::error!("Scheduled reconnect failed: {}", e);
            }
        });

        if let Some(previous) = inner.retry.replace(task) {
            previous.abort();
        }
    }

    fn cancel_pending_retry(&self) {
        if let Some(task) = self.lock_inner().retry.take() {
            task.abort();
            log::debug!("Cancelled pending reconnect");
        }
    }

    /// Callers hold the `inner` lock so state and session change together.
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::info!("Session state: {} -> {}", previous, next);
            self.event_bus.emit(SESSION_STATE, &json!({ "state": next }));
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = inner.retry.take() {
            task.abort();
        }
    }
}
