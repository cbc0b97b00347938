//! Error types for the chat relay
//!
//! Every error here is local to the connection (or bootstrap step) that
//! raised it. The room never sees these; it only observes that a client left.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error, including oversized frames (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The OS random source could not produce a client identity
    #[error("Identity generation failed: {0}")]
    Identity(#[from] rand::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload was blank after normalization
    #[error("Empty message")]
    EmptyMessage,

    /// Frame payload was not valid UTF-8
    #[error("Malformed frame: payload is not valid UTF-8")]
    MalformedFrame,

    /// Peer did not complete the WebSocket upgrade in time
    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    /// Write did not complete before the write deadline
    #[error("Write deadline exceeded")]
    WriteTimeout,

    /// Connection already closed by the other loop
    #[error("Connection closed")]
    ConnectionClosed,
}
