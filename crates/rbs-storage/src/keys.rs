//! Storage key constants.

/// Storage keys used by the client
pub struct StorageKeys;

impl StorageKeys {
    /// Serialized token pair (JSON). Presence means "signed in".
    pub const TOKEN_INFO: &'static str = "token_info";
}
