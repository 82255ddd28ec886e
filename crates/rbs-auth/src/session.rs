//! Session management with gated token refresh using FSM-based state tracking.
//!
//! `SessionManager` owns the current token pair. All requests to the token
//! endpoints (anonymous bootstrap, custom-token exchange, refresh) run behind
//! a single async gate so at most one is in flight. Readers clone the pair
//! out of a lock and never wait on the gate unless the pair needs work.

use crate::claims::{decode_claims, needs_refresh};
use crate::token_fsm::{TokenMachine, TokenMachineInput, TokenPhase};
use crate::{AuthError, AuthResult, Clock, SystemClock, TokenService};
use parking_lot::{Mutex, RwLock};
use rbs_storage::{CredentialStore, StorageError, TokenPair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

/// Default window before access-token expiry in which a refresh is due.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 30;

const STATUS_CHANNEL_CAPACITY: usize = 64;
const TOKEN_CHANNEL_CAPACITY: usize = 16;

/// Authentication status as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// A sign-in exchange is in flight.
    Authenticating,
    /// Signed in with a non-anonymous token.
    SignedIn,
    /// Signed in with an anonymous token.
    SignedInAnonymously,
    /// No credentials held.
    SignedOut,
}

/// Identity read from the current access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub anonymous: bool,
}

/// Payload for auth status notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatusChanged {
    pub status: AuthStatus,
    /// Present for the signed-in statuses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthUser>,
}

impl AuthStatusChanged {
    fn bare(status: AuthStatus) -> Self {
        Self { status, user: None }
    }
}

/// Change to the current token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Replaced(TokenPair),
    Cleared,
}

/// Status stream that yields the status current at subscription time first.
///
/// Dropping the subscription unsubscribes.
pub struct StatusSubscription {
    pending: Option<AuthStatusChanged>,
    receiver: broadcast::Receiver<AuthStatusChanged>,
}

impl StatusSubscription {
    /// Next status, or `None` once the session manager is gone.
    pub async fn recv(&mut self) -> Option<AuthStatusChanged> {
        if let Some(initial) = self.pending.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth status subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered status without waiting.
    pub fn try_recv(&mut self) -> Option<AuthStatusChanged> {
        if let Some(initial) = self.pending.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Derive the observer-facing status from the held pair.
fn derive_status(tokens: Option<&TokenPair>) -> AuthStatusChanged {
    let Some(pair) = tokens else {
        return AuthStatusChanged::bare(AuthStatus::SignedOut);
    };
    match decode_claims(pair.access_token()) {
        Ok(claims) => AuthStatusChanged {
            status: if claims.anonymous {
                AuthStatus::SignedInAnonymously
            } else {
                AuthStatus::SignedIn
            },
            user: Some(AuthUser {
                user_id: claims.subject_id,
                anonymous: claims.anonymous,
            }),
        },
        Err(e) => {
            debug!(error = %e, "Access token claims unreadable");
            AuthStatusChanged::bare(AuthStatus::SignedIn)
        }
    }
}

fn require_complete(pair: TokenPair) -> AuthResult<TokenPair> {
    if pair.is_complete() {
        Ok(pair)
    } else {
        Err(AuthError::InvalidToken(
            "issued pair is missing a token".to_string(),
        ))
    }
}

struct SessionState {
    machine: TokenMachine,
    /// Bumped by every sign-out; exchanges started under an older epoch
    /// discard their result.
    epoch: u64,
    last_status: AuthStatusChanged,
}

/// Owner of the current token pair.
pub struct SessionManager {
    project_id: String,
    store: CredentialStore,
    service: Arc<dyn TokenService>,
    clock: Arc<dyn Clock>,
    refresh_skew_secs: i64,
    /// Lock order: `state` before `tokens`.
    tokens: RwLock<Option<TokenPair>>,
    state: Mutex<SessionState>,
    gate: tokio::sync::Mutex<()>,
    status_tx: broadcast::Sender<AuthStatusChanged>,
    token_tx: broadcast::Sender<TokenEvent>,
}

impl SessionManager {
    /// Create a signed-out session manager. Call [`restore`](Self::restore)
    /// to pick up persisted credentials.
    pub fn new(
        project_id: impl Into<String>,
        store: CredentialStore,
        service: Arc<dyn TokenService>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (token_tx, _) = broadcast::channel(TOKEN_CHANNEL_CAPACITY);
        Self {
            project_id: project_id.into(),
            store,
            service,
            clock: Arc::new(SystemClock),
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
            tokens: RwLock::new(None),
            state: Mutex::new(SessionState {
                machine: TokenMachine::new(),
                epoch: 0,
                last_status: AuthStatusChanged::bare(AuthStatus::SignedOut),
            }),
            gate: tokio::sync::Mutex::new(()),
            status_tx,
            token_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_refresh_skew(mut self, secs: i64) -> Self {
        self.refresh_skew_secs = secs;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Snapshot of the current pair.
    pub fn current_tokens(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }

    pub fn current_auth_status(&self) -> AuthStatus {
        derive_status(self.tokens.read().as_ref()).status
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        derive_status(self.tokens.read().as_ref()).user
    }

    /// Current FSM phase.
    pub fn phase(&self) -> TokenPhase {
        TokenPhase::from(self.state.lock().machine.state())
    }

    /// Subscribe to status changes, starting with the current status.
    pub fn subscribe_status(&self) -> StatusSubscription {
        let state = self.state.lock();
        StatusSubscription {
            pending: Some(state.last_status.clone()),
            receiver: self.status_tx.subscribe(),
        }
    }

    /// Subscribe to token replacements and clears.
    pub fn subscribe_tokens(&self) -> broadcast::Receiver<TokenEvent> {
        self.token_tx.subscribe()
    }

    /// Load the persisted pair, if any, into memory.
    ///
    /// A record that cannot be decoded is deleted and treated as signed out.
    pub fn restore(&self) -> AuthResult<Option<TokenPair>> {
        let pair = match self.store.load() {
            Ok(Some(pair)) => pair,
            Ok(None) => return Ok(None),
            Err(StorageError::Encoding(reason)) => {
                warn!(%reason, "Stored credentials are corrupt, discarding");
                self.store.clear()?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state.lock();
        if let Some(current) = self.current_tokens() {
            debug!("Credentials already held, ignoring stored record");
            return Ok(Some(current));
        }
        self.transition(&mut state, &TokenMachineInput::CredentialRestored)?;
        *self.tokens.write() = Some(pair.clone());

        let payload = derive_status(Some(&pair));
        info!(status = ?payload.status, "Restored stored credentials");
        self.publish(&mut state, payload);
        let _ = self.token_tx.send(TokenEvent::Replaced(pair.clone()));
        Ok(Some(pair))
    }

    /// Return a usable pair, obtaining or refreshing one when needed.
    ///
    /// A non-empty `custom_token` is always exchanged. Otherwise a missing
    /// pair triggers an anonymous bootstrap, and a pair inside the refresh
    /// window is refreshed. A failed refresh signs the session out.
    pub async fn ensure_valid_token(&self, custom_token: Option<&str>) -> AuthResult<TokenPair> {
        if let Some(custom_token) = custom_token.filter(|t| !t.is_empty()) {
            let _gate = self.gate.lock().await;
            return self.exchange_custom_token(custom_token).await;
        }

        if let Some(pair) = self.current_tokens() {
            if let Ok(false) = self.refresh_due(&pair) {
                return Ok(pair);
            }
        }

        let _gate = self.gate.lock().await;
        // Re-read: whoever held the gate may have already done the work.
        match self.current_tokens() {
            None => self.bootstrap_anonymous().await,
            Some(pair) => self.refresh_if_due(pair).await,
        }
    }

    /// Drop all credentials. Safe to call repeatedly.
    pub fn sign_out(&self) -> AuthStatus {
        let mut state = self.state.lock();
        state.epoch = state.epoch.wrapping_add(1);
        let _ = self.transition(&mut state, &TokenMachineInput::SignedOut);
        if self.clear_locked(&mut state) {
            info!("Signed out");
        }
        AuthStatus::SignedOut
    }

    fn refresh_due(&self, pair: &TokenPair) -> AuthResult<bool> {
        let access_exp = decode_claims(pair.access_token())?.require_expiry()?;
        let refresh_exp = decode_claims(pair.refresh_token())?.require_expiry()?;
        Ok(needs_refresh(
            access_exp,
            refresh_exp,
            self.clock.now(),
            self.refresh_skew_secs,
        ))
    }

    async fn bootstrap_anonymous(&self) -> AuthResult<TokenPair> {
        let epoch = self.begin_exchange(TokenMachineInput::AnonymousRequested, true)?;
        info!(project_id = %self.project_id, "Signing in anonymously");

        let issued = self
            .service
            .anonymous_auth(&self.project_id)
            .await
            .and_then(require_complete);
        match issued {
            Ok(pair) => self.complete_exchange(epoch, pair),
            Err(e) => {
                warn!(error = %e, "Anonymous sign-in failed");
                self.abandon_exchange(epoch);
                Err(AuthError::ExchangeFailed(Box::new(e)))
            }
        }
    }

    async fn exchange_custom_token(&self, custom_token: &str) -> AuthResult<TokenPair> {
        let epoch = self.begin_exchange(TokenMachineInput::CustomTokenSubmitted, true)?;
        info!("Exchanging custom token");

        let issued = self
            .service
            .custom_auth(custom_token)
            .await
            .and_then(require_complete);
        match issued {
            Ok(pair) => self.complete_exchange(epoch, pair),
            Err(e) => {
                warn!(error = %e, "Custom token exchange failed");
                self.abandon_exchange(epoch);
                Err(AuthError::ExchangeFailed(Box::new(e)))
            }
        }
    }

    async fn refresh_if_due(&self, pair: TokenPair) -> AuthResult<TokenPair> {
        let due = match self.refresh_due(&pair) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Held token cannot be read, discarding credentials");
                self.sign_out();
                return Err(e);
            }
        };
        if !due {
            return Ok(pair);
        }

        let epoch = self.begin_exchange(TokenMachineInput::RefreshStarted, false)?;
        debug!("Refreshing access token");

        let issued = self
            .service
            .refresh(pair.refresh_token())
            .await
            .and_then(require_complete);
        match issued {
            Ok(new_pair) => {
                let new_pair = self.complete_exchange(epoch, new_pair)?;
                info!("Access token refreshed");
                Ok(new_pair)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                if self.reject_refresh(epoch) {
                    Err(AuthError::RefreshExpired)
                } else {
                    Err(AuthError::Interrupted)
                }
            }
        }
    }

    fn begin_exchange(&self, input: TokenMachineInput, announce: bool) -> AuthResult<u64> {
        let mut state = self.state.lock();
        self.transition(&mut state, &input)?;
        if announce {
            self.publish(&mut state, AuthStatusChanged::bare(AuthStatus::Authenticating));
        }
        Ok(state.epoch)
    }

    fn complete_exchange(&self, epoch: u64, pair: TokenPair) -> AuthResult<TokenPair> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!("Discarding token pair issued after sign-out");
            return Err(AuthError::Interrupted);
        }
        self.transition(&mut state, &TokenMachineInput::TokenIssued)?;

        // A storage failure must not cost a live session.
        if let Err(e) = self.store.save(&pair) {
            warn!(error = %e, "Failed to persist credentials");
        }
        *self.tokens.write() = Some(pair.clone());

        let payload = derive_status(Some(&pair));
        self.publish(&mut state, payload);
        let _ = self.token_tx.send(TokenEvent::Replaced(pair.clone()));
        Ok(pair)
    }

    fn abandon_exchange(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return;
        }
        let _ = self.transition(&mut state, &TokenMachineInput::ExchangeFailed);
        let payload = derive_status(self.tokens.read().as_ref());
        if state.last_status != payload {
            self.publish(&mut state, payload);
        }
    }

    /// Returns false if a sign-out already superseded the refresh.
    fn reject_refresh(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.epoch = state.epoch.wrapping_add(1);
        let _ = self.transition(&mut state, &TokenMachineInput::RefreshRejected);
        self.clear_locked(&mut state);
        true
    }

    /// Returns whether a pair was held.
    fn clear_locked(&self, state: &mut SessionState) -> bool {
        let had_tokens = self.tokens.write().take().is_some();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to delete stored credentials");
        }
        if had_tokens {
            self.publish(state, AuthStatusChanged::bare(AuthStatus::SignedOut));
            let _ = self.token_tx.send(TokenEvent::Cleared);
        } else if state.last_status.status != AuthStatus::SignedOut {
            self.publish(state, AuthStatusChanged::bare(AuthStatus::SignedOut));
        }
        had_tokens
    }

    fn transition(&self, state: &mut SessionState, input: &TokenMachineInput) -> AuthResult<TokenPhase> {
        let old_phase = TokenPhase::from(state.machine.state());
        state.machine.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                state.machine.state()
            ))
        })?;
        let new_phase = TokenPhase::from(state.machine.state());
        if old_phase != new_phase {
            debug!(old_phase = ?old_phase, new_phase = ?new_phase, "Token phase transition");
        }
        Ok(new_phase)
    }

    fn publish(&self, state: &mut SessionState, payload: AuthStatusChanged) {
        debug!(status = ?payload.status, "Auth status changed");
        state.last_status = payload.clone();
        // No receivers is fine.
        let _ = self.status_tx.send(payload);
    }
}
