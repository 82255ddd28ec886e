//! Persistence of the current token pair.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Access and refresh token issued together by the backend.
///
/// A pair is never edited in place; a refresh produces a new pair that
/// replaces the old one as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Both tokens are present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .finish()
    }
}

/// Reads and writes the persisted [`TokenPair`] record.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn SecureStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Load the persisted pair.
    ///
    /// Returns an encoding error for a record that exists but cannot be
    /// decoded or is missing one of its tokens.
    pub fn load(&self) -> StorageResult<Option<TokenPair>> {
        let Some(raw) = self.storage.get(StorageKeys::TOKEN_INFO)? else {
            return Ok(None);
        };

        let pair: TokenPair = serde_json::from_str(&raw)?;
        if !pair.is_complete() {
            warn!("Stored token record is missing a token");
            return Err(StorageError::Encoding(
                "stored token pair is incomplete".to_string(),
            ));
        }
        Ok(Some(pair))
    }

    /// Persist a pair, replacing any previous record.
    pub fn save(&self, pair: &TokenPair) -> StorageResult<()> {
        let json = serde_json::to_string(pair)?;
        self.storage.set(StorageKeys::TOKEN_INFO, &json)?;
        debug!("Token pair persisted");
        Ok(())
    }

    /// Delete the persisted record. Returns true if one existed.
    pub fn clear(&self) -> StorageResult<bool> {
        self.storage.delete(StorageKeys::TOKEN_INFO)
    }

    /// Whether a record is stored.
    pub fn has_credentials(&self) -> StorageResult<bool> {
        self.storage.has(StorageKeys::TOKEN_INFO)
    }
}
