//! Shared state for the HTTP server.

use courier_core::MessageGateway;
use std::sync::Arc;

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    pub gateway: Arc<MessageGateway>,
}

impl SharedState {
    pub fn new(gateway: Arc<MessageGateway>) -> Self {
        Self { gateway }
    }
}
