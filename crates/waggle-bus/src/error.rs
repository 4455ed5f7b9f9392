//! Error types of the bus.
//!
//! Expected transport failures are data, not exceptions: `publish` records
//! them as event status and `SendError` enumerates every way a wire attempt
//! can fail so callers handle them exhaustively.

use std::time::Duration;

/// Failure to reach or drive the physical connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket failure: {0}")]
    Websocket(String),
    #[error("connection closed")]
    Closed,
    #[error("invalid TLS materials: {0}")]
    Tls(String),
}

/// Outcome of a single wire-level send attempt.
///
/// None of these are surfaced from `Bus::publish`; they resolve to event
/// status `FAILED` and are recovered by the next replay pass.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("publication rejected: {0}")]
    Rejected(String),
    #[error("publication cancelled by disconnection")]
    Cancelled,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Startup failure of the bus itself.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// The durable backend could not be used.
///
/// Raised by store/update/retrieve after the liveness probe fails; callers
/// treat it as best-effort and keep publishing without durability.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("persistence backend unreachable")]
    Unreachable,
    #[error("persistence backend failure: {0}")]
    Backend(String),
}
