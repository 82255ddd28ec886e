//! Token endpoint client.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use rbs_storage::TokenPair;
use reqwest::Client;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};
use url::Url;

/// Backend endpoints that mint token pairs.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Obtain an anonymous pair for a project.
    async fn anonymous_auth(&self, project_id: &str) -> AuthResult<TokenPair>;

    /// Exchange a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair>;

    /// Exchange a host-issued custom token for a pair.
    async fn custom_auth(&self, custom_token: &str) -> AuthResult<TokenPair>;
}

/// Response bodies may echo credentials, so only a digest is logged.
fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// `TokenService` over the public GET endpoints.
#[derive(Clone, Debug)]
pub struct HttpTokenService {
    http_client: Client,
    base_url: Url,
}

impl HttpTokenService {
    /// `base_url` is the region's GET base and must end with `/`.
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http_client: Client, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    async fn fetch_pair(&self, path: &str, param: (&str, &str)) -> AuthResult<TokenPair> {
        let url = self.base_url.join(path)?;
        debug!(url = %url, "Requesting token pair");

        let response = self
            .http_client
            .get(url)
            .query(&[param])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body_summary = summarize_response_body(&body);
            warn!(status = %status, body = %body_summary, path, "Token request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body_summary,
            });
        }

        let pair: TokenPair = response.json().await?;
        if !pair.is_complete() {
            return Err(AuthError::InvalidToken(
                "token response is missing a token".to_string(),
            ));
        }
        Ok(pair)
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn anonymous_auth(&self, project_id: &str) -> AuthResult<TokenPair> {
        self.fetch_pair("public/anonymous-auth", ("projectId", project_id))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.fetch_pair("public/auth-refresh", ("refreshToken", refresh_token))
            .await
    }

    async fn custom_auth(&self, custom_token: &str) -> AuthResult<TokenPair> {
        self.fetch_pair("public/auth", ("customToken", custom_token))
            .await
    }
}
