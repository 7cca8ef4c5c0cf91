//! The protocol client capability.
//!
//! The session manager never speaks the wire protocol itself. It asks a
//! [`Connector`] for a [`Connection`], which pairs a [`ProtocolHandle`] (for
//! outbound calls) with a stream of [`ClientEvent`]s (lifecycle and credential
//! updates). [`crate::bridge`] provides the production implementation;
//! [`crate::testing`] provides doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Disconnect reason codes reported in a close event's error payload.
pub mod disconnect_reason {
    pub const CONNECTION_CLOSED: u16 = 428;
    pub const CONNECTION_LOST: u16 = 408;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const TIMED_OUT: u16 = 408;
    pub const LOGGED_OUT: u16 = 401;
    pub const BAD_SESSION: u16 = 500;
    pub const RESTART_REQUIRED: u16 = 515;
    pub const MULTIDEVICE_MISMATCH: u16 = 411;
    pub const FORBIDDEN: u16 = 403;
    pub const UNAVAILABLE_SERVICE: u16 = 503;
}

/// How the session manager reacts to a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Transient; reconnect after the configured delay.
    Recoverable,
    /// Logged out; never reconnect automatically.
    Terminal,
    /// A code this build does not know about.
    Unrecognized,
}

impl DisconnectClass {
    pub fn classify(code: u16) -> Self {
        use disconnect_reason::*;
        match code {
            BAD_SESSION | CONNECTION_CLOSED | CONNECTION_LOST | CONNECTION_REPLACED
            | RESTART_REQUIRED => DisconnectClass::Recoverable,
            LOGGED_OUT => DisconnectClass::Terminal,
            _ => DisconnectClass::Unrecognized,
        }
    }
}

/// Connection phase carried by a `connection.update` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DisconnectError>,
}

/// Payload of a `connection.update` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionPhase::Open),
            last_disconnect: None,
        }
    }

    pub fn close(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            last_disconnect: Some(LastDisconnect {
                error: Some(DisconnectError {
                    status_code: Some(status_code),
                    message: Some(message.into()),
                }),
            }),
        }
    }

    /// Reason code of a close.
    ///
    /// An error without a status code, or no error at all, counts as a bad
    /// session (500).
    pub fn disconnect_code(&self) -> u16 {
        self.last_disconnect
            .as_ref()
            .and_then(|last| last.error.as_ref())
            .and_then(|error| error.status_code)
            .unwrap_or(disconnect_reason::BAD_SESSION)
    }

    pub fn disconnect_message(&self) -> Option<&str> {
        self.last_disconnect
            .as_ref()
            .and_then(|last| last.error.as_ref())
            .and_then(|error| error.message.as_deref())
    }
}

/// Events a live connection reports asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    /// Partial credential object; top-level keys replace the stored ones.
    #[serde(rename = "creds.update")]
    CredsUpdate(serde_json::Value),
}

/// Outbound message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Browser identity announced during the handshake: (os, browser, version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserIdentity(pub String, pub String, pub String);

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self(
            "Mac OS".to_string(),
            "Safari".to_string(),
            "10.15.7".to_string(),
        )
    }
}

/// Everything a connector needs to open a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectConfig {
    pub creds: serde_json::Value,
    pub browser: BrowserIdentity,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Failed to start protocol client: {0}")]
    Spawn(String),

    #[error("Protocol client closed")]
    Closed,

    #[error("Protocol request timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Remote(String),

    #[error("Malformed protocol message: {0}")]
    Malformed(String),
}

/// A live connection handle.
#[async_trait]
pub trait ProtocolHandle: Send + Sync {
    /// Ask the network for a one-time code linking this device to `phone_number`.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ProtocolError>;

    async fn send_message(&self, jid: &str, content: MessageContent) -> Result<(), ProtocolError>;

    /// Tear the connection down. Safe to call more than once.
    async fn end(&self);
}

/// A freshly opened connection.
pub struct Connection {
    pub handle: Arc<dyn ProtocolHandle>,
    /// Closes when the underlying client goes away.
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: ConnectConfig) -> Result<Connection, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod classify {
        use super::*;
        use disconnect_reason::*;

        #[test]
        fn transient_reasons_are_recoverable() {
            for code in [
                BAD_SESSION,
                CONNECTION_CLOSED,
                CONNECTION_LOST,
                CONNECTION_REPLACED,
                RESTART_REQUIRED,
                TIMED_OUT,
            ] {
                assert_eq!(DisconnectClass::classify(code), DisconnectClass::Recoverable);
            }
        }

        #[test]
        fn logged_out_is_terminal() {
            assert_eq!(DisconnectClass::classify(LOGGED_OUT), DisconnectClass::Terminal);
        }

        #[test]
        fn other_codes_are_unrecognized() {
            for code in [FORBIDDEN, MULTIDEVICE_MISMATCH, UNAVAILABLE_SERVICE, 999] {
                assert_eq!(DisconnectClass::classify(code), DisconnectClass::Unrecognized);
            }
        }
    }

    mod connection_update {
        use super::*;

        #[test]
        fn disconnect_code_reads_status() {
            let update = ConnectionUpdate::close(440, "replaced");
            assert_eq!(update.disconnect_code(), 440);
            assert_eq!(update.disconnect_message(), Some("replaced"));
        }

        #[test]
        fn missing_status_is_bad_session() {
            let update = ConnectionUpdate {
                connection: Some(ConnectionPhase::Close),
                last_disconnect: Some(LastDisconnect {
                    error: Some(DisconnectError {
                        status_code: None,
                        message: Some("boom".to_string()),
                    }),
                }),
            };
            assert_eq!(update.disconnect_code(), disconnect_reason::BAD_SESSION);
        }

        #[test]
        fn missing_error_is_bad_session() {
            let update = ConnectionUpdate {
                connection: Some(ConnectionPhase::Close),
                last_disconnect: None,
            };
            assert_eq!(update.disconnect_code(), disconnect_reason::BAD_SESSION);
            assert_eq!(update.disconnect_message(), None);
        }
    }

    mod client_event {
        use super::*;

        #[test]
        fn parses_close_event() {
            let event: ClientEvent = serde_json::from_value(json!({
                "event": "connection.update",
                "data": {
                    "connection": "close",
                    "lastDisconnect": {"error": {"statusCode": 401, "message": "logged out"}}
                }
            }))
            .unwrap();

            match event {
                ClientEvent::ConnectionUpdate(update) => {
                    assert_eq!(update.connection, Some(ConnectionPhase::Close));
                    assert_eq!(update.disconnect_code(), 401);
                }
                other => panic!("Expected ConnectionUpdate, got {:?}", other),
            }
        }

        #[test]
        fn parses_update_without_phase() {
            let event: ClientEvent = serde_json::from_value(json!({
                "event": "connection.update",
                "data": {"qr": "ignored"}
            }))
            .unwrap();
            assert_eq!(
                event,
                ClientEvent::ConnectionUpdate(ConnectionUpdate::default())
            );
        }

        #[test]
        fn parses_creds_update() {
            let event: ClientEvent = serde_json::from_value(json!({
                "event": "creds.update",
                "data": {"registered": true}
            }))
            .unwrap();
            assert_eq!(event, ClientEvent::CredsUpdate(json!({"registered": true})));
        }
    }

    #[test]
    fn browser_identity_serializes_as_triple() {
        let json = serde_json::to_value(BrowserIdentity::default()).unwrap();
        assert_eq!(json, json!(["Mac OS", "Safari", "10.15.7"]));
    }
}
