//! Single-connection WebSocket server for the hixie-75 draft.
//!
//! Accepts one client at a time, validates the upgrade request, replies
//! with the fixed handshake and then reads `0xFF`-terminated text frames,
//! handing each one to every registered [`Action`] in order.

mod action;
mod server;
mod session;

pub use action::{Action, ActionRegistry, DEFAULT_ACTION_CAPACITY, FnAction, Responder};
pub use server::{ConcurrentClientPolicy, ServerConfig, WebSocketServer};
pub use session::{Session, SessionState, TimeoutPolicy};

pub use hixie_protocol::{Frame, HandshakeOutcome, ProtocolError};

use std::time::Duration;

/// Default frame-pass deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default wait for the first byte of the upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Gap after which the upgrade request is considered fully received.
pub const REQUEST_IDLE_GAP: Duration = Duration::from_millis(50);

/// Default cap on the upgrade request size.
pub const DEFAULT_MAX_REQUEST_LEN: usize = 4096;

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("action registry full (capacity {capacity})")]
    RegistryFull { capacity: usize },
}
