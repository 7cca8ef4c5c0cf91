//! The managed messaging session.
//!
//! Exactly one session exists at a time. [`SessionManager`] creates it,
//! watches its lifecycle events, and replaces it after transient disconnects.

mod manager;
mod state;

pub use manager::{ManagerConfig, SessionError, SessionManager};
pub use state::{ConnectionState, Session, SessionId};
