//! Protocol client backed by a bridge process.
//!
//! The messaging network's wire protocol lives in a separate program (the
//! bridge, typically a Node script wrapping the network's client library).
//! Courier spawns it in the user's login shell and talks to it over stdio
//! using the line protocol in [`wire`].
//!
//! Each [`BridgeConnector::connect`] call spawns a fresh process, so one
//! bridge process backs exactly one session. Ending the handle kills it.
//!
//! When a log directory is configured, every line in both directions is
//! mirrored to `{log_dir}/bridge-{id}.log`.

pub mod wire;

use crate::logging::{log_line, open_log_file, LogHandle};
use crate::protocol::{
    ClientEvent, ConnectConfig, Connection, Connector, MessageContent, ProtocolError,
    ProtocolHandle,
};
use crate::shell::build_login_shell_command;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use wire::Message;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ProtocolError>>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How to launch the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Custom shell prefix (e.g. "/bin/zsh -l -c").
    pub shell_prefix: Option<String>,
    /// Directory for per-process traffic logs.
    pub log_dir: Option<String>,
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            shell_prefix: None,
            log_dir: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn shell_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shell_prefix = Some(prefix.into());
        self
    }

    pub fn log_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Spawns one bridge process per connection.
pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, config: ConnectConfig) -> Result<Connection, ProtocolError> {
        let mut cmd = build_login_shell_command(
            &self.config.command,
            &self.config.args,
            self.config.shell_prefix.as_deref(),
        )
        .map_err(ProtocolError::Spawn)?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProtocolError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::Spawn("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProtocolError::Spawn("Failed to capture stderr".to_string()))?;

        let log_id = format!("bridge-{}", Uuid::new_v4());
        let traffic = open_log_file(self.config.log_dir.as_deref(), &log_id);
        log::info!("Spawned bridge process {} (pid {:?})", log_id, child.id());

        forward_stderr(stderr, Arc::clone(&traffic));

        let (handle, events) =
            BridgeHandle::attach(stdin, stdout, self.config.request_timeout, traffic);
        handle.set_child(child);

        let params = serde_json::to_value(&config)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if let Err(e) = handle.request(wire::METHOD_CONNECT, params).await {
            handle.end().await;
            return Err(e);
        }

        Ok(Connection { handle, events })
    }
}

/// One live bridge process.
pub struct BridgeHandle {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    last_id: AtomicU64,
    request_timeout: Duration,
    traffic: LogHandle,
    child: Mutex<Option<Child>>,
}

impl BridgeHandle {
    /// Wire a handle to the bridge's stdin and stdout and start reading.
    ///
    /// The returned receiver yields the bridge's events and closes when its
    /// stdout does.
    pub fn attach(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
        request_timeout: Duration,
        traffic: LogHandle,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEvent>) {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer) as BoxedWriter)),
            pending: Arc::clone(&pending),
            last_id: AtomicU64::new(1),
            request_timeout,
            traffic: Arc::clone(&traffic),
            child: Mutex::new(None),
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Failed to read from bridge: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                log_line(&traffic, "stdout", &line);

                match wire::parse_line(&line) {
                    Ok(Message::Response(response)) => {
                        let callback = lock(&pending).remove(&response.id);
                        match callback {
                            Some(tx) => {
                                let _ = tx.send(response.into_result());
                            }
                            None => log::debug!("Response for unknown request {}", response.id),
                        }
                    }
                    Ok(Message::Event(event)) => {
                        // Keep draining stdout so pending requests still resolve.
                        let _ = events_tx.send(event);
                    }
                    Ok(Message::Unknown(value)) => {
                        log::trace!("Ignoring bridge message: {}", value)
                    }
                    Err(e) => log::debug!("{}: {}", e, line),
                }
            }

            log::info!("Bridge output closed");
            fail_pending(&pending);
        });

        (handle, events_rx)
    }

    fn set_child(&self, child: Child) {
        *lock(&self.child) = Some(child);
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);
        let line = wire::encode_request(id, method, params)?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(ProtocolError::Timeout(method.to_string()))
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), ProtocolError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::Closed)?;

        log_line(&self.traffic, "stdin", line);
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            log::warn!("Failed to write to bridge: {}", e);
            guard.take();
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolHandle for BridgeHandle {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ProtocolError> {
        let result = self
            .request(
                wire::METHOD_REQUEST_PAIRING_CODE,
                json!({ "phoneNumber": phone_number }),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Malformed(format!("pairing code was {}", result)))
    }

    async fn send_message(&self, jid: &str, content: MessageContent) -> Result<(), ProtocolError> {
        self.request(
            wire::METHOD_SEND_MESSAGE,
            json!({ "jid": jid, "content": content }),
        )
        .await
        .map(|_| ())
    }

    async fn end(&self) {
        self.writer.lock().await.take();
        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                log::debug!("Bridge process already gone: {}", e);
            }
        }
        fail_pending(&self.pending);
    }
}

fn forward_stderr(stderr: impl AsyncRead + Send + Unpin + 'static, traffic: LogHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log_line(&traffic, "stderr", &line);
            log::warn!("bridge: {}", line);
        }
    });
}

/// Dropping the senders wakes every waiter with `Closed`.
fn fail_pending(pending: &PendingMap) {
    lock(pending).clear();
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
