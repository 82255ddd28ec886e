//! Test doubles for code built on `SessionManager`.

use crate::{AuthError, AuthResult, Clock, TokenService};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rbs_storage::TokenPair;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// An unsigned JWT carrying the claims the client reads.
pub fn fake_jwt(user_id: &str, anonymous: bool, exp: i64) -> String {
    let payload = serde_json::json!({
        "userId": user_id,
        "anonymous": anonymous,
        "exp": exp,
    });
    format!(
        "{}.{}.unsigned",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes())
    )
}

/// A pair whose access and refresh tokens expire at the given instants.
pub fn fake_pair(user_id: &str, anonymous: bool, access_exp: i64, refresh_exp: i64) -> TokenPair {
    TokenPair::new(
        fake_jwt(user_id, anonymous, access_exp),
        fake_jwt(user_id, anonymous, refresh_exp),
    )
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Canned answer for one token request.
#[derive(Debug, Clone)]
pub enum Reply {
    Issue(TokenPair),
    Reject(u16),
}

impl Reply {
    fn into_result(self) -> AuthResult<TokenPair> {
        match self {
            Reply::Issue(pair) => Ok(pair),
            Reply::Reject(status) => Err(AuthError::Rejected {
                status,
                body_summary: String::from("scripted"),
            }),
        }
    }
}

/// `TokenService` answering from per-endpoint queues and counting calls.
///
/// An exhausted queue answers with HTTP 500.
#[derive(Debug, Default)]
pub struct ScriptedTokenService {
    anonymous: Mutex<VecDeque<Reply>>,
    refresh: Mutex<VecDeque<Reply>>,
    custom: Mutex<VecDeque<Reply>>,
    anonymous_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    custom_calls: AtomicUsize,
    seen_refresh_tokens: Mutex<Vec<String>>,
    seen_custom_tokens: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedTokenService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_anonymous(&self, reply: Reply) {
        self.anonymous.lock().push_back(reply);
    }

    pub fn push_refresh(&self, reply: Reply) {
        self.refresh.lock().push_back(reply);
    }

    pub fn push_custom(&self, reply: Reply) {
        self.custom.lock().push_back(reply);
    }

    pub fn anonymous_calls(&self) -> usize {
        self.anonymous_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn custom_calls(&self) -> usize {
        self.custom_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.anonymous_calls() + self.refresh_calls() + self.custom_calls()
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen_refresh_tokens.lock().clone()
    }

    pub fn seen_custom_tokens(&self) -> Vec<String> {
        self.seen_custom_tokens.lock().clone()
    }

    async fn answer(&self, queue: &Mutex<VecDeque<Reply>>) -> AuthResult<TokenPair> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let reply = queue.lock().pop_front().unwrap_or(Reply::Reject(500));
        reply.into_result()
    }
}

#[async_trait]
impl TokenService for ScriptedTokenService {
    async fn anonymous_auth(&self, _project_id: &str) -> AuthResult<TokenPair> {
        self.anonymous_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.anonymous).await
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens
            .lock()
            .push(refresh_token.to_string());
        self.answer(&self.refresh).await
    }

    async fn custom_auth(&self, custom_token: &str) -> AuthResult<TokenPair> {
        self.custom_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_custom_tokens.lock().push(custom_token.to_string());
        self.answer(&self.custom).await
    }
}
