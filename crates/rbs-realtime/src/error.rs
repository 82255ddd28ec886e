//! Realtime error types.

use thiserror::Error;

/// Realtime error type.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The transport could not open or keep the connection
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid socket URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Not connected error
    #[error("Not connected to realtime socket")]
    NotConnected,

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Result type alias using RealtimeError.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
