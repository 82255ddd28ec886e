//! Client facade that wires session, executor and realtime together.

use crate::action::{ActionRequest, RequestMode};
use crate::executor::RequestExecutor;
use crate::transport::{ActionTransport, HttpActionTransport};
use crate::visibility::{Visibility, VisibilityTracker};
use crate::{ClientError, ClientResult};
use parking_lot::Mutex;
use rbs_auth::{
    AuthError, AuthStatus, AuthStatusChanged, AuthUser, Clock, HttpTokenService, SessionManager,
    StatusSubscription, SystemClock, TokenEvent, TokenService,
};
use rbs_config_and_utils::{Config, Endpoints, ReconnectConfig};
use rbs_realtime::{
    ConnectionManager, ConnectionState, RealtimeError, RealtimeEvent, ReconnectPolicy,
    ReconnectRequest, SocketTransport, WebSocketTransport,
};
use rbs_storage::{CredentialStore, SecureStorage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backend seams used by the client.
pub struct ClientServices {
    pub token_service: Arc<dyn TokenService>,
    pub action_transport: Arc<dyn ActionTransport>,
    pub socket_transport: Arc<dyn SocketTransport>,
    pub clock: Arc<dyn Clock>,
}

impl ClientServices {
    /// HTTP and WebSocket implementations for the given endpoints.
    pub fn http(endpoints: &Endpoints) -> Self {
        Self {
            token_service: Arc::new(HttpTokenService::new(endpoints.get_url.clone())),
            action_transport: Arc::new(HttpActionTransport::new()),
            socket_transport: Arc::new(WebSocketTransport::new(endpoints.socket_url.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

fn reconnect_policy(config: &ReconnectConfig) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(config.initial_delay_ms),
        max_delay: Duration::from_millis(config.max_delay_ms),
        max_attempts: config.max_attempts,
    }
}

/// Handle to a fire-and-forget action. Dropping it detaches the action.
pub struct ActionTask {
    handle: JoinHandle<ClientResult<String>>,
}

impl ActionTask {
    /// Wait for the action's result.
    pub async fn join(self) -> ClientResult<String> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::TaskFailed(e.to_string())),
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Registration of an auth status callback. Dropping it unsubscribes.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An RBS client session.
///
/// Owns the token lifecycle, action execution and, when enabled, the
/// realtime socket with its background tasks. Must be started within a
/// tokio runtime.
pub struct RbsClient {
    config: Config,
    session: Arc<SessionManager>,
    executor: Arc<RequestExecutor>,
    realtime: Option<ConnectionManager>,
    visibility: VisibilityTracker,
    action_permits: Arc<Semaphore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RbsClient {
    /// Start a client against the configured region over HTTP.
    pub fn start(config: Config, storage: Arc<dyn SecureStorage>) -> ClientResult<Self> {
        let endpoints = config.endpoints()?;
        let services = ClientServices::http(&endpoints);
        Self::start_with(config, storage, services)
    }

    /// Start a client with explicit backend seams.
    ///
    /// Persisted credentials are restored before this returns; with the
    /// socket enabled, a restored session connects immediately.
    pub fn start_with(
        config: Config,
        storage: Arc<dyn SecureStorage>,
        services: ClientServices,
    ) -> ClientResult<Self> {
        config.validate()?;
        let endpoints = config.endpoints()?;

        let session = Arc::new(
            SessionManager::new(
                config.project_id.clone(),
                CredentialStore::new(storage),
                services.token_service,
            )
            .with_clock(services.clock)
            .with_refresh_skew(config.refresh_skew_secs),
        );
        let realtime = config.socket_enabled.then(|| {
            ConnectionManager::new(
                services.socket_transport,
                reconnect_policy(&config.reconnect),
            )
        });
        let executor = Arc::new(
            RequestExecutor::new(
                config.project_id.clone(),
                endpoints,
                session.clone(),
                services.action_transport,
            )
            .with_realtime(realtime.clone()),
        );
        let visibility = VisibilityTracker::new();

        // Subscribe before restoring so the restored pair reaches the socket.
        let token_events = session.subscribe_tokens();
        let restored = session.restore()?;

        let mut tasks = Vec::new();
        if let Some(realtime) = &realtime {
            tasks.push(tokio::spawn(forward_token_events(
                token_events,
                session.clone(),
                realtime.clone(),
            )));
            tasks.push(tokio::spawn(follow_visibility(
                visibility.subscribe(),
                session.clone(),
                realtime.clone(),
                executor.clone(),
            )));
            if let Some(requests) = realtime.take_reconnect_requests() {
                tasks.push(tokio::spawn(supervise_reconnects(
                    requests,
                    realtime.clone(),
                    executor.clone(),
                )));
            }
        }

        info!(
            project_id = %config.project_id,
            region = %config.region,
            restored = restored.is_some(),
            socket_enabled = config.socket_enabled,
            "RBS client started"
        );

        Ok(Self {
            action_permits: Arc::new(Semaphore::new(config.max_in_flight_actions)),
            config,
            session,
            executor,
            realtime,
            visibility,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Obtain an anonymous session unless one is already held.
    pub async fn sign_in_anonymously(&self) -> ClientResult<AuthStatus> {
        self.session.ensure_valid_token(None).await?;
        Ok(self.session.current_auth_status())
    }

    /// Exchange a host-issued custom token for a session.
    pub async fn sign_in_with_custom_token(&self, custom_token: &str) -> ClientResult<AuthStatus> {
        if custom_token.is_empty() {
            return Err(AuthError::InvalidArgument(
                "custom token must not be empty".to_string(),
            )
            .into());
        }
        self.session.ensure_valid_token(Some(custom_token)).await?;
        Ok(self.session.current_auth_status())
    }

    /// Run an action and return the response body.
    pub async fn execute(&self, request: ActionRequest) -> ClientResult<String> {
        Ok(self.executor.execute(&request, RequestMode::Execute).await?)
    }

    /// Run an action in the background.
    ///
    /// At most `max_in_flight_actions` run at once; the rest wait.
    pub fn send_action(&self, request: ActionRequest) -> ActionTask {
        let permits = self.action_permits.clone();
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ClientError::ShutDown)?;
            Ok(executor.execute(&request, RequestMode::Execute).await?)
        });
        ActionTask { handle }
    }

    /// Signed GET URL for a `get` action.
    pub async fn generate_action_url(&self, action: &str, payload: Value) -> ClientResult<String> {
        let request = ActionRequest::new(action).with_payload(payload);
        Ok(self
            .executor
            .execute(&request, RequestMode::GenerateUrl)
            .await?)
    }

    /// Unauthenticated GET URL for an action.
    pub fn generate_public_action_url(&self, action: &str, payload: &Value) -> ClientResult<String> {
        Ok(self.executor.generate_public_url(action, payload)?)
    }

    pub fn current_auth_status(&self) -> AuthStatus {
        self.session.current_auth_status()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.session.current_user()
    }

    /// Status stream starting with the current status.
    pub fn subscribe_auth_status(&self) -> StatusSubscription {
        self.session.subscribe_status()
    }

    /// Call `callback` with the current status and every later change
    /// until the handle is dropped.
    pub fn on_auth_status_changed<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(AuthStatusChanged) + Send + 'static,
    {
        let mut subscription = self.session.subscribe_status();
        let task = tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                callback(change);
            }
        });
        ListenerHandle { task }
    }

    /// Realtime events, or `None` with the socket disabled.
    pub fn subscribe_realtime(&self) -> Option<broadcast::Receiver<RealtimeEvent>> {
        self.realtime.as_ref().map(ConnectionManager::subscribe)
    }

    pub fn realtime_state(&self) -> Option<ConnectionState> {
        self.realtime.as_ref().map(ConnectionManager::state)
    }

    /// Send a text frame on the realtime socket.
    pub async fn send_realtime(&self, text: impl Into<String>) -> ClientResult<()> {
        let realtime = self.realtime.as_ref().ok_or(RealtimeError::NotConnected)?;
        Ok(realtime.send(text).await?)
    }

    /// Report host visibility; backgrounding pauses the socket.
    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    /// Drop the session and close the socket.
    pub fn sign_out(&self) -> AuthStatus {
        if let Some(realtime) = &self.realtime {
            realtime.disconnect(false);
        }
        self.session.sign_out()
    }

    /// Stop background work. Queued background actions fail with
    /// `ShutDown`; the session itself is kept.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.action_permits.close();
        if let Some(realtime) = &self.realtime {
            realtime.disconnect(false);
        }
        info!("RBS client shut down");
    }
}

impl Drop for RbsClient {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Connect on every token replacement and disconnect on clear.
async fn forward_token_events(
    mut tokens: broadcast::Receiver<TokenEvent>,
    session: Arc<SessionManager>,
    realtime: ConnectionManager,
) {
    loop {
        match tokens.recv().await {
            Ok(TokenEvent::Replaced(pair)) => realtime.connect(pair.access_token()),
            Ok(TokenEvent::Cleared) => realtime.disconnect(false),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Token events lagged, resyncing realtime");
                match session.current_tokens() {
                    Some(pair) => realtime.connect(pair.access_token()),
                    None => realtime.disconnect(false),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Pause on background; on foreground, reconnect a paused socket if a
/// credential is still held.
async fn follow_visibility(
    mut visibility: watch::Receiver<Visibility>,
    session: Arc<SessionManager>,
    realtime: ConnectionManager,
    executor: Arc<RequestExecutor>,
) {
    while visibility.changed().await.is_ok() {
        let current = *visibility.borrow_and_update();
        match current {
            Visibility::Background => realtime.disconnect(true),
            Visibility::Foreground => {
                if realtime.resume() && session.current_tokens().is_some() {
                    debug!("Foregrounded, reconnecting realtime");
                    if let Err(e) = executor.connect_socket().await {
                        warn!(error = %e, "Realtime reconnect on foreground failed");
                    }
                }
            }
        }
    }
}

async fn supervise_reconnects(
    mut requests: mpsc::UnboundedReceiver<ReconnectRequest>,
    realtime: ConnectionManager,
    executor: Arc<RequestExecutor>,
) {
    while let Some(request) = requests.recv().await {
        info!(
            attempt = request.attempt,
            delay_ms = request.delay.as_millis() as u64,
            "Scheduling realtime reconnect"
        );
        tokio::time::sleep(request.delay).await;
        if !realtime.is_current(request.generation) {
            debug!("Reconnect superseded");
            continue;
        }
        if let Err(e) = executor.connect_socket().await {
            warn!(error = %e, "Realtime reconnect failed");
        }
    }
}
