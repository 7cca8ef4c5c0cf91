//! The caller-facing operations: `send` and `status`.
//!
//! A send that arrives while the session is down kicks off a reconnect and
//! waits a bounded grace window for it. The reconnect keeps going after the
//! window closes, so a later request can find the session ready.

use crate::address::normalize_recipient;
use crate::logging::utc_timestamp;
use crate::session::SessionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a send waits for a reconnect before giving up.
    pub grace_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub connected: bool,
    pub timestamp: String,
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    /// The normalized address the message went to.
    pub to: String,
}

pub struct MessageGateway {
    manager: Arc<SessionManager>,
    config: GatewayConfig,
}

impl MessageGateway {
    pub fn new(manager: Arc<SessionManager>, config: GatewayConfig) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            connected: self.manager.is_connected(),
            timestamp: utc_timestamp(),
        }
    }

    pub async fn send(
        &self,
        number: Option<&str>,
        message: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let (number, message) = match (number, message) {
            (Some(number), Some(message)) if !number.is_empty() && !message.is_empty() => {
                (number, message)
            }
            _ => {
                return Err(GatewayError::InvalidArgument(
                    "Both number and message are required".to_string(),
                ))
            }
        };

        if !self.manager.is_connected() && !self.reconnect().await {
            return Err(GatewayError::Unavailable(
                "Failed to connect to the messaging session".to_string(),
            ));
        }

        let to = normalize_recipient(number);
        match self.manager.send_text(&to, message).await {
            Ok(()) => {
                log::info!("Message sent to {}", to);
                Ok(SendReceipt { to })
            }
            Err(e) => {
                log::error!("Failed to send message to {}: {}", to, e);
                Err(GatewayError::SendFailed(e.to_string()))
            }
        }
    }

    /// Start (or join) a connection attempt and wait for it within the grace window.
    async fn reconnect(&self) -> bool {
        log::info!("Session not connected, attempting to reconnect");
        let deadline = Instant::now() + self.config.grace_window;

        let manager = Arc::clone(&self.manager);
        let attempt = tokio::spawn(async move { manager.start().await });

        match tokio::time::timeout_at(deadline, attempt).await {
            Ok(Ok(Ok(_))) => {}
            Ok(Ok(Err(e))) => log::warn!("Reconnect attempt failed: {}", e),
            Ok(Err(e)) => log::error!("Reconnect task failed: {}", e),
            Err(_) => log::debug!("Reconnect attempt still running after grace window"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.manager.wait_for_connection(remaining).await
    }
}
