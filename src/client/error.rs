// Error types for the consoled client, covering both the wire codec and the
// Router/Client Session that build on it. One enum per crate rather than a
// family of per-module errors.

use std::io;
use thiserror::Error;

/// Comprehensive error type for consoled client operations.
#[derive(Debug, Error)]
pub enum ConsoledError {
    /// Invalid call into the library, e.g. a missing stream name.
    #[error("invalid configuration or call: {0}")]
    Config(String),

    /// TCP connect failed or timed out, or the Router failed to start.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// A frame was missing required fields, carried an unsupported major
    /// version, or failed to parse as JSON.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected a subscribe request, or confirmed a mode that
    /// lacked a requested permission.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// A write was attempted on a stream without write permission.
    #[error("not subscribed for write on stream {0}")]
    NotSubscribed(String),

    /// The TCP connection was closed mid-session.
    #[error("connection lost")]
    ConnectionLost,

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Underlying socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization failure while encoding an outbound frame.
    #[error("failed to encode frame: {0}")]
    Encode(serde_json::Error),

    /// JSON parse failure while decoding an inbound frame.
    #[error("failed to decode frame: {0}")]
    Decode(serde_json::Error),
}

/// Result type alias for consoled client operations.
pub type ConsoledResult<T> = Result<T, ConsoledError>;
