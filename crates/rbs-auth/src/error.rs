//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A required argument was empty or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Anonymous or custom-token exchange failed; existing state is unchanged
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(#[source] Box<AuthError>),

    /// The refresh token was rejected; credentials have been cleared
    #[error("Refresh token expired")]
    RefreshExpired,

    /// Backend answered a token request with a non-success status
    #[error("Backend rejected request: HTTP {status} ({body_summary})")]
    Rejected { status: u16, body_summary: String },

    /// Token string could not be decoded into claims
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Sign-out happened while the request was in flight
    #[error("Signed out while the token request was in flight")]
    Interrupted,

    /// Invalid state transition in the token FSM
    #[error("Invalid token state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] rbs_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include connection failures, timeouts and 5xx
    /// responses, including when wrapped by `ExchangeFailed`.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::ExchangeFailed(inner) => inner.is_transient(),
            AuthError::Rejected { status, .. } => *status >= 500,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
