//! HTTP seam for action calls.

use crate::{TransportError, TransportResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully composed action call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub method: HttpMethod,
    /// Carries the access token in its query; never log it whole.
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    /// JSON body for POST calls.
    pub body: Option<String>,
}

/// Sends action calls to the backend.
#[async_trait]
pub trait ActionTransport: Send + Sync {
    /// Returns the response body of a successful call.
    async fn send(&self, call: ActionCall) -> TransportResult<String>;
}

/// `ActionTransport` over reqwest.
#[derive(Clone, Debug, Default)]
pub struct HttpActionTransport {
    http_client: Client,
}

impl HttpActionTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ActionTransport for HttpActionTransport {
    async fn send(&self, call: ActionCall) -> TransportResult<String> {
        debug!(method = ?call.method, path = %call.url.path(), "Sending action");

        let mut builder = match call.method {
            HttpMethod::Get => self.http_client.get(call.url.clone()),
            HttpMethod::Post => self
                .http_client
                .post(call.url.clone())
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(call.body.unwrap_or_default()),
        };
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status, path = %call.url.path(), "Action rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn action_url(server: &MockServer, action: &str, query: &str) -> Url {
        Url::parse(&format!(
            "{}/user/action/proj/{}?{}",
            server.uri(),
            action,
            query
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_forwards_query_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/action/proj/rbs.product.get.list"))
            .and(query_param("auth", "tok"))
            .and(query_param("data", "e30="))
            .and(header("x-app-version", "1.2.3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1,2]"))
            .expect(1)
            .mount(&server)
            .await;

        let call = ActionCall {
            method: HttpMethod::Get,
            url: action_url(&server, "rbs.product.get.list", "auth=tok&data=e30%3D"),
            headers: BTreeMap::from([("x-app-version".to_string(), "1.2.3".to_string())]),
            body: None,
        };
        let body = HttpActionTransport::new().send(call).await.unwrap();
        assert_eq!(body, "[1,2]");
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/action/proj/rbs.cart.request.add"))
            .and(query_param("auth", "tok"))
            .and(header("content-type", "application/json; charset=utf-8"))
            .and(body_json(serde_json::json!({"sku": "A1", "qty": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let call = ActionCall {
            method: HttpMethod::Post,
            url: action_url(&server, "rbs.cart.request.add", "auth=tok"),
            headers: BTreeMap::new(),
            body: Some(r#"{"sku":"A1","qty":2}"#.to_string()),
        };
        assert_eq!(HttpActionTransport::new().send(call).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_non_success_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let call = ActionCall {
            method: HttpMethod::Get,
            url: action_url(&server, "rbs.product.get.list", "auth=tok"),
            headers: BTreeMap::new(),
            body: None,
        };
        let err = HttpActionTransport::new().send(call).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Status { status: 403, ref body } if body == "forbidden"
        ));
    }
}
