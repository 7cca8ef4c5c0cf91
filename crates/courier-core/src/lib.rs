//! # courier-core
//!
//! Core business logic for Courier, a small HTTP gateway in front of a single
//! long-lived messaging session.
//!
//! This crate is framework-agnostic and can be used by:
//! - The HTTP server (`courier-http`)
//! - The daemon binary (`courier-daemon`)
//! - Tests, through the doubles in [`testing`]
//!
//! ## Key Concepts
//!
//! - **Session**: the one live connection to the messaging network
//! - **SessionManager**: owns the session, classifies disconnects, reconnects
//! - **MessageGateway**: the caller-facing `send` / `status` operations
//! - **Connector / ProtocolHandle**: the protocol client capability, injected

pub mod address;
pub mod bridge;
pub mod credentials;
pub mod event_bus;
pub mod gateway;
pub mod logging;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod shell;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use event_bus::EventBus;
pub use gateway::{GatewayConfig, GatewayError, MessageGateway, SendReceipt, StatusReport};
pub use session::{ConnectionState, ManagerConfig, SessionError, SessionManager};
