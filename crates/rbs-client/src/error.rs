//! Client error types.

use rbs_auth::AuthError;
use rbs_config_and_utils::CoreError;
use rbs_realtime::RealtimeError;
use thiserror::Error;

/// Failure of the HTTP call carrying an action.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response
    #[error("Action failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid action URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Request executor error type.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Empty action or an action that cannot be used in this mode
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Action name has fewer than four dot-separated segments
    #[error("Malformed action name: {0}")]
    MalformedAction(String),

    /// No usable token could be obtained
    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    /// Action transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client facade error type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] CoreError),

    /// Authentication error
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Action error
    #[error("Action error: {0}")]
    Exec(#[from] ExecError),

    /// Realtime error
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// The client was shut down
    #[error("Client is shut down")]
    ShutDown,

    /// A spawned action was aborted or panicked
    #[error("Action task did not complete: {0}")]
    TaskFailed(String),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type alias using ExecError.
pub type ExecResult<T> = Result<T, ExecError>;

/// Result type alias using ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
