//! Session identity and connection state.

use crate::protocol::ProtocolHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for one connection attempt.
///
/// Events are tagged with the id of the session that produced them so a late
/// event from a discarded handle cannot touch its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the managed session.
///
/// ```text
/// Disconnected ──start──► Connecting ──(unregistered)──► Pairing
///      ▲                      │                              │
///      │                      └────────── open ──────────────┤
///      │                                                     ▼
///      └──── close (recoverable, retry scheduled) ◄──── Connected
///                                                            │
///                     LoggedOut ◄──── close (logged out) ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Pairing,
    Connected,
    /// Disconnected by a logout; never retried automatically.
    LoggedOut,
}

impl ConnectionState {
    /// A connection attempt is underway and may still open.
    pub fn is_in_progress(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Pairing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggedOut => "logged_out",
        };
        f.write_str(name)
    }
}

/// The single live connection.
pub struct Session {
    pub id: SessionId,
    pub handle: Arc<dyn ProtocolHandle>,
    /// Set by an `open` event; the connectivity flag.
    pub opened: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(handle: Arc<dyn ProtocolHandle>) -> Self {
        Self {
            id: SessionId::new(),
            handle,
            opened: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod session_id {
        use super::*;

        #[test]
        fn new_generates_unique_ids() {
            assert_ne!(SessionId::new(), SessionId::new());
        }

        #[test]
        fn display_shows_inner_string() {
            let id = SessionId("session-123".to_string());
            assert_eq!(format!("{}", id), "session-123");
        }
    }

    mod connection_state {
        use super::*;

        #[test]
        fn in_progress_states() {
            assert!(ConnectionState::Connecting.is_in_progress());
            assert!(ConnectionState::Pairing.is_in_progress());
            assert!(!ConnectionState::Connected.is_in_progress());
            assert!(!ConnectionState::Disconnected.is_in_progress());
            assert!(!ConnectionState::LoggedOut.is_in_progress());
        }

        #[test]
        fn serializes_snake_case() {
            let json = serde_json::to_string(&ConnectionState::LoggedOut).unwrap();
            assert_eq!(json, "\"logged_out\"");
        }

        #[test]
        fn display_matches_serialization() {
            for state in [
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Pairing,
                ConnectionState::Connected,
                ConnectionState::LoggedOut,
            ] {
                let json = serde_json::to_string(&state).unwrap();
                assert_eq!(json, format!("\"{}\"", state));
            }
        }
    }
}
