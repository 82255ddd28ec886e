//! Request executor: token check, URL composition, action call.

use crate::action::{ActionName, ActionRequest, RequestMode, CONNECT_SOCKET};
use crate::transport::{ActionCall, ActionTransport, HttpMethod};
use crate::{ExecError, ExecResult, TransportError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rbs_auth::SessionManager;
use rbs_config_and_utils::Endpoints;
use rbs_realtime::ConnectionManager;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Runs actions against the backend on behalf of the current session.
pub struct RequestExecutor {
    project_id: String,
    endpoints: Endpoints,
    session: Arc<SessionManager>,
    transport: Arc<dyn ActionTransport>,
    realtime: Option<ConnectionManager>,
}

impl RequestExecutor {
    pub fn new(
        project_id: impl Into<String>,
        endpoints: Endpoints,
        session: Arc<SessionManager>,
        transport: Arc<dyn ActionTransport>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            endpoints,
            session,
            transport,
            realtime: None,
        }
    }

    /// Route the reserved connect action to this manager.
    pub fn with_realtime(mut self, realtime: Option<ConnectionManager>) -> Self {
        self.realtime = realtime;
        self
    }

    /// Execute an action, or render its signed GET URL.
    ///
    /// The action name is validated before any token or network work.
    pub async fn execute(&self, request: &ActionRequest, mode: RequestMode) -> ExecResult<String> {
        if request.action.is_empty() {
            return Err(ExecError::InvalidArgument(
                "action must not be empty".to_string(),
            ));
        }
        if request.action == CONNECT_SOCKET {
            return self.connect_socket().await;
        }

        let action = ActionName::parse(&request.action)?;
        if mode == RequestMode::GenerateUrl && !action.is_get() {
            return Err(ExecError::InvalidArgument(format!(
                "only get actions can be rendered as URLs: {}",
                request.action
            )));
        }

        let tokens = self.session.ensure_valid_token(None).await?;
        let access_token = tokens.access_token();

        if action.is_get() {
            let url = self.get_url(action, request, access_token)?;
            if mode == RequestMode::GenerateUrl {
                debug!(action = %request.action, "Generated action URL");
                return Ok(url.into());
            }
            self.send(ActionCall {
                method: HttpMethod::Get,
                url,
                headers: request.headers.clone(),
                body: None,
            })
            .await
        } else {
            let url = self.post_url(action, request, access_token)?;
            let body = serde_json::to_string(&request.payload)?;
            self.send(ActionCall {
                method: HttpMethod::Post,
                url,
                headers: request.headers.clone(),
                body: Some(body),
            })
            .await
        }
    }

    /// Compose an unauthenticated GET URL. No token is obtained.
    pub fn generate_public_url(&self, action: &str, payload: &Value) -> ExecResult<String> {
        if action.is_empty() {
            return Err(ExecError::InvalidArgument(
                "action must not be empty".to_string(),
            ));
        }
        let mut url = self.action_url(&self.endpoints.get_url, action)?;
        url.query_pairs_mut()
            .append_pair("data", &encode_payload(payload)?);
        Ok(url.into())
    }

    /// Ensure a token and (re)connect the realtime socket with it.
    pub async fn connect_socket(&self) -> ExecResult<String> {
        let tokens = self.session.ensure_valid_token(None).await?;
        if let Some(realtime) = &self.realtime {
            info!("Connecting realtime socket");
            realtime.connect(tokens.access_token());
        }
        Ok(String::new())
    }

    async fn send(&self, call: ActionCall) -> ExecResult<String> {
        let action_path = call.url.path().to_string();
        let body = self.transport.send(call).await?;
        debug!(path = %action_path, bytes = body.len(), "Action completed");
        Ok(body)
    }

    fn action_url(&self, base: &Url, action: &str) -> ExecResult<Url> {
        base.join(&format!("user/action/{}/{}", self.project_id, action))
            .map_err(|e| ExecError::Transport(TransportError::InvalidUrl(e)))
    }

    fn get_url(
        &self,
        action: ActionName<'_>,
        request: &ActionRequest,
        access_token: &str,
    ) -> ExecResult<Url> {
        let mut url = self.action_url(&self.endpoints.get_url, action.as_str())?;
        let data = encode_payload(&request.payload)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("auth", access_token);
            query.append_pair("data", &data);
            if let Some(culture) = &request.culture {
                query.append_pair("culture", culture);
            }
        }
        Ok(url)
    }

    fn post_url(
        &self,
        action: ActionName<'_>,
        request: &ActionRequest,
        access_token: &str,
    ) -> ExecResult<Url> {
        let mut url = self.action_url(&self.endpoints.post_url, action.as_str())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("auth", access_token);
            if let Some(culture) = &request.culture {
                query.append_pair("culture", culture);
            }
        }
        Ok(url)
    }
}

/// Base64 of the payload's compact JSON.
fn encode_payload(payload: &Value) -> ExecResult<String> {
    Ok(STANDARD.encode(serde_json::to_string(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rbs_auth::testing::{fake_pair, ManualClock, Reply, ScriptedTokenService};
    use rbs_auth::AuthError;
    use rbs_config_and_utils::Region;
    use rbs_storage::{CredentialStore, MemoryStorage, TokenPair};
    use serde_json::json;
    use std::collections::VecDeque;

    const NOW: i64 = 1_700_000_000;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<ActionCall>>,
        replies: Mutex<VecDeque<TransportResult<String>>>,
    }

    #[async_trait]
    impl ActionTransport for RecordingTransport {
        async fn send(&self, call: ActionCall) -> TransportResult<String> {
            self.calls.lock().push(call);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    struct Harness {
        executor: RequestExecutor,
        service: Arc<ScriptedTokenService>,
        transport: Arc<RecordingTransport>,
        pair: TokenPair,
    }

    fn signed_in_harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let pair = fake_pair("u1", false, NOW + 3600, NOW + 86_400);
        CredentialStore::new(storage.clone()).save(&pair).unwrap();

        let service = Arc::new(ScriptedTokenService::new());
        let session = SessionManager::new("proj", CredentialStore::new(storage), service.clone())
            .with_clock(Arc::new(ManualClock::new(NOW)));
        session.restore().unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let executor = RequestExecutor::new(
            "proj",
            Endpoints::for_region(Region::EuWest1).unwrap(),
            Arc::new(session),
            transport.clone(),
        );
        Harness {
            executor,
            service,
            transport,
            pair,
        }
    }

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_get_action_composition() {
        let h = signed_in_harness();
        let request = ActionRequest::new("rbs.product.get.list")
            .with_payload(json!({"page": 2}))
            .with_culture("en-US")
            .with_header("x-app", "demo");

        let body = h.executor.execute(&request, RequestMode::Execute).await.unwrap();

        assert_eq!(body, "ok");
        let calls = h.transport.calls.lock();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.method, HttpMethod::Get);
        assert_eq!(call.url.host_str(), Some("core.rtbs.io"));
        assert_eq!(call.url.path(), "/user/action/proj/rbs.product.get.list");
        assert_eq!(
            query(&call.url),
            vec![
                ("auth".to_string(), h.pair.access_token().to_string()),
                ("data".to_string(), STANDARD.encode(r#"{"page":2}"#)),
                ("culture".to_string(), "en-US".to_string()),
            ]
        );
        assert_eq!(call.headers.get("x-app").map(String::as_str), Some("demo"));
        assert_eq!(call.body, None);
    }

    #[tokio::test]
    async fn test_post_action_composition() {
        let h = signed_in_harness();
        let request = ActionRequest::new("rbs.order.request.create")
            .with_payload(json!({"sku": "A1"}));

        h.executor.execute(&request, RequestMode::Execute).await.unwrap();

        let calls = h.transport.calls.lock();
        let call = &calls[0];
        assert_eq!(call.method, HttpMethod::Post);
        assert_eq!(call.url.host_str(), Some("core-internal.rtbs.io"));
        assert_eq!(call.url.path(), "/user/action/proj/rbs.order.request.create");
        assert_eq!(
            query(&call.url),
            vec![("auth".to_string(), h.pair.access_token().to_string())]
        );
        assert_eq!(call.body.as_deref(), Some(r#"{"sku":"A1"}"#));
    }

    #[tokio::test]
    async fn test_generate_url_performs_no_call() {
        let h = signed_in_harness();
        let request = ActionRequest::new("rbs.product.get.detail").with_payload(json!({"id": 7}));

        let rendered = h
            .executor
            .execute(&request, RequestMode::GenerateUrl)
            .await
            .unwrap();

        let url = Url::parse(&rendered).unwrap();
        assert_eq!(url.path(), "/user/action/proj/rbs.product.get.detail");
        assert_eq!(
            query(&url),
            vec![
                ("auth".to_string(), h.pair.access_token().to_string()),
                ("data".to_string(), STANDARD.encode(r#"{"id":7}"#)),
            ]
        );
        assert!(h.transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_generate_url_rejects_post_actions() {
        let h = signed_in_harness();
        let err = h
            .executor
            .execute(&ActionRequest::new("rbs.a.request.b"), RequestMode::GenerateUrl)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_public_url_needs_no_token() {
        let h = signed_in_harness();
        let rendered = h
            .executor
            .generate_public_url("rbs.cms.get.page", &json!({"slug": "home"}))
            .unwrap();

        let url = Url::parse(&rendered).unwrap();
        assert_eq!(url.path(), "/user/action/proj/rbs.cms.get.page");
        assert_eq!(
            query(&url),
            vec![("data".to_string(), STANDARD.encode(r#"{"slug":"home"}"#))]
        );
        assert_eq!(h.service.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_action_is_rejected() {
        let h = signed_in_harness();
        let err = h
            .executor
            .execute(&ActionRequest::new(""), RequestMode::Execute)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::InvalidArgument(_)));
        assert!(matches!(
            h.executor.generate_public_url("", &json!({})),
            Err(ExecError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let h = signed_in_harness();
        h.transport.replies.lock().push_back(Err(TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        }));

        let err = h
            .executor
            .execute(&ActionRequest::new("rbs.a.get.b"), RequestMode::Execute)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecError::Transport(TransportError::Status { status: 500, .. })
        ));
        // No retry.
        assert_eq!(h.transport.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces() {
        let storage = Arc::new(MemoryStorage::new());
        let service = Arc::new(ScriptedTokenService::new());
        service.push_anonymous(Reply::Reject(500));
        let session = SessionManager::new("proj", CredentialStore::new(storage), service);
        let transport = Arc::new(RecordingTransport::default());
        let executor = RequestExecutor::new(
            "proj",
            Endpoints::for_region(Region::EuWest1).unwrap(),
            Arc::new(session),
            transport.clone(),
        );

        let err = executor
            .execute(&ActionRequest::new("rbs.a.get.b"), RequestMode::Execute)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecError::AuthFailed(AuthError::ExchangeFailed(_))
        ));
        assert!(transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_socket_without_realtime_returns_empty() {
        let h = signed_in_harness();
        let body = h
            .executor
            .execute(&ActionRequest::new(CONNECT_SOCKET), RequestMode::Execute)
            .await
            .unwrap();
        assert_eq!(body, "");
        assert!(h.transport.calls.lock().is_empty());
    }
}
