//! In-memory doubles for the protocol client and credential storage.
//!
//! Compiled for this crate's tests and, behind the `testing` feature, for
//! other crates' tests.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::credentials::{AuthState, CredentialError, CredentialStore};
use crate::event_bus::EventBus;
use crate::pairing::{PairingError, PairingInput, StaticPairingInput};
use crate::protocol::{
    ClientEvent, ConnectConfig, Connection, ConnectionUpdate, Connector, MessageContent,
    ProtocolError, ProtocolHandle,
};
use crate::session::{ManagerConfig, SessionManager};

/// Phone number the default test manager pairs with.
pub const TEST_PHONE_NUMBER: &str = "201234567890";

/// Records everything done through one fake connection.
pub struct FakeHandle {
    pairing_code: String,
    sent: Mutex<Vec<(String, MessageContent)>>,
    pairing_requests: Mutex<Vec<String>>,
    send_error: Mutex<Option<String>>,
    ended: AtomicBool,
}

impl FakeHandle {
    fn new(pairing_code: String) -> Self {
        Self {
            pairing_code,
            sent: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            ended: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(String, MessageContent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().unwrap().clone()
    }

    /// Make every following send fail with `message`.
    pub fn fail_sends(&self, message: &str) {
        *self.send_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolHandle for FakeHandle {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ProtocolError> {
        self.pairing_requests
            .lock()
            .unwrap()
            .push(phone_number.to_string());
        Ok(self.pairing_code.clone())
    }

    async fn send_message(&self, jid: &str, content: MessageContent) -> Result<(), ProtocolError> {
        if let Some(message) = self.send_error.lock().unwrap().clone() {
            return Err(ProtocolError::Remote(message));
        }
        self.sent.lock().unwrap().push((jid.to_string(), content));
        Ok(())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

struct FakeConnection {
    handle: Arc<FakeHandle>,
    events: Option<mpsc::UnboundedSender<ClientEvent>>,
}

/// Hands out [`FakeHandle`]s and lets tests drive their lifecycle events.
///
/// Connections are numbered from 0 in the order they were opened.
pub struct FakeConnector {
    auto_open: bool,
    pairing_code: String,
    connections: Mutex<Vec<FakeConnection>>,
    configs: Mutex<Vec<ConnectConfig>>,
    connect_error: Mutex<Option<ProtocolError>>,
}

impl FakeConnector {
    /// Connections stay in the connecting phase until [`FakeConnector::open`].
    pub fn new() -> Self {
        Self {
            auto_open: false,
            pairing_code: "ABCD1234".to_string(),
            connections: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            connect_error: Mutex::new(None),
        }
    }

    /// Every connection reports `open` as soon as it is created.
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            ..Self::new()
        }
    }

    pub fn with_pairing_code(mut self, code: &str) -> Self {
        self.pairing_code = code.to_string();
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn handle(&self, index: usize) -> Arc<FakeHandle> {
        Arc::clone(&self.connections.lock().unwrap()[index].handle)
    }

    pub fn last_config(&self) -> Option<ConnectConfig> {
        self.configs.lock().unwrap().last().cloned()
    }

    /// Fail the next `connect` call with `error`.
    pub fn fail_next_connect(&self, error: ProtocolError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    /// Deliver an event on connection `index`. Returns false once its stream is gone.
    pub fn emit(&self, index: usize, event: ClientEvent) -> bool {
        let connections = self.connections.lock().unwrap();
        connections[index]
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn open(&self, index: usize) -> bool {
        self.emit(index, ClientEvent::ConnectionUpdate(ConnectionUpdate::open()))
    }

    pub fn close(&self, index: usize, status_code: u16) -> bool {
        self.emit(
            index,
            ClientEvent::ConnectionUpdate(ConnectionUpdate::close(status_code, "closed by test")),
        )
    }

    /// Drop connection `index`'s event sender, as if the client process died.
    pub fn drop_events(&self, index: usize) {
        self.connections.lock().unwrap()[index].events.take();
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: ConnectConfig) -> Result<Connection, ProtocolError> {
        if let Some(error) = self.connect_error.lock().unwrap().take() {
            return Err(error);
        }
        self.configs.lock().unwrap().push(config);

        let handle = Arc::new(FakeHandle::new(self.pairing_code.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        if self.auto_open {
            let _ = tx.send(ClientEvent::ConnectionUpdate(ConnectionUpdate::open()));
        }

        self.connections.lock().unwrap().push(FakeConnection {
            handle: Arc::clone(&handle),
            events: Some(tx),
        });

        Ok(Connection {
            handle,
            events: rx,
        })
    }
}

/// Credentials kept in memory, with a save counter.
pub struct MemoryCredentialStore {
    state: Mutex<AuthState>,
    saves: AtomicUsize,
    fail_loads: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new(state: AuthState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
        }
    }

    pub fn registered() -> Self {
        Self::new(AuthState {
            creds: json!({"registered": true}),
        })
    }

    pub fn unregistered() -> Self {
        Self::new(AuthState::empty())
    }

    pub fn current(&self) -> AuthState {
        self.state.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every following load fail.
    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<AuthState, CredentialError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CredentialError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "credential store unavailable",
            )));
        }
        Ok(self.current())
    }

    fn save(&self, state: &AuthState) -> Result<(), CredentialError> {
        *self.state.lock().unwrap() = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers after a delay, like an operator typing at the console.
pub struct DelayedPairingInput {
    delay: Duration,
    answer: Result<String, PairingError>,
    asked: AtomicUsize,
}

impl DelayedPairingInput {
    pub fn new(delay: Duration, answer: Result<String, PairingError>) -> Self {
        Self {
            delay,
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn ask_count(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PairingInput for DelayedPairingInput {
    async fn phone_number(&self) -> Result<String, PairingError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.answer.clone()
    }
}

/// A manager over the given doubles, pairing with [`TEST_PHONE_NUMBER`].
pub fn build_manager(
    connector: Arc<FakeConnector>,
    credentials: Arc<MemoryCredentialStore>,
) -> Arc<SessionManager> {
    build_manager_with(
        ManagerConfig::default(),
        connector,
        credentials,
        TEST_PHONE_NUMBER,
        Arc::new(EventBus::new()),
    )
}

pub fn build_manager_with(
    config: ManagerConfig,
    connector: Arc<FakeConnector>,
    credentials: Arc<MemoryCredentialStore>,
    phone_number: &str,
    event_bus: Arc<EventBus>,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        config,
        connector,
        credentials,
        Arc::new(StaticPairingInput::new(phone_number)),
        event_bus,
    ))
}

/// A manager with default config that asks `pairing_input` for the number.
pub fn build_manager_with_input(
    connector: Arc<FakeConnector>,
    credentials: Arc<MemoryCredentialStore>,
    pairing_input: Arc<dyn PairingInput>,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        ManagerConfig::default(),
        connector,
        credentials,
        pairing_input,
        Arc::new(EventBus::new()),
    ))
}
