//! Session event broadcasting.
//!
//! The session manager publishes lifecycle changes and pairing codes here so
//! the daemon (console output) and any other observer can follow along without
//! reaching into the manager.
//!
//! # Topics
//!
//! - [`SESSION_STATE`]: `{"state": "connecting" | "pairing" | "connected" | ...}`
//! - [`PAIRING_CODE`]: `{"code": "ABCD-1234", "phoneNumber": "201234567890"}`

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events beyond this capacity cause slow subscribers to lag.
const DEFAULT_CAPACITY: usize = 64;

pub const SESSION_STATE: &str = "session:state";
pub const PAIRING_CODE: &str = "session:pairing-code";

/// A broadcast event containing an event type and JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Fan-out of session events to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it; with no subscribers
    /// the event is dropped.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let json_payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize event payload: {}", e);
                return 0;
            }
        };

        self.sender
            .send(BroadcastEvent::new(event_type, json_payload))
            .unwrap_or(0)
    }

    /// Past events are not delivered to new subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(SESSION_STATE, &json!({"state": "connecting"})), 0);
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SESSION_STATE, &json!({"state": "connecting"}));
        bus.emit(PAIRING_CODE, &json!({"code": "ABCD-1234"}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.event_type, SESSION_STATE);
        assert_eq!(first.payload["state"], "connecting");
        assert_eq!(second.event_type, PAIRING_CODE);
        assert_eq!(second.payload["code"], "ABCD-1234");
    }

    #[tokio::test]
    async fn late_subscriber_misses_old_events() {
        let bus = EventBus::new();
        let _early = bus.subscribe();
        bus.emit(SESSION_STATE, &json!({"state": "connecting"}));

        let mut late = bus.subscribe();
        bus.emit(SESSION_STATE, &json!({"state": "connected"}));

        let event = late.recv().await.unwrap();
        assert_eq!(event.payload["state"], "connected");
    }
}
