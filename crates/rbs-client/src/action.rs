//! Action names and requests.

use crate::{ExecError, ExecResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Reserved action that (re)connects the realtime socket instead of
/// calling the backend.
pub const CONNECT_SOCKET: &str = "CONNECT_SOCKET";

/// Core actions every RBS project exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAction {
    Instance,
    Call,
    State,
}

impl CoreAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreAction::Instance => "rbs.core.request.INSTANCE",
            CoreAction::Call => "rbs.core.request.CALL",
            CoreAction::State => "rbs.core.request.STATE",
        }
    }
}

impl fmt::Display for CoreAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the executor handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Call the backend and return the response body.
    #[default]
    Execute,
    /// Return the signed GET URL without calling it.
    GenerateUrl,
}

/// One action call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action: String,
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
    pub culture: Option<String>,
}

impl ActionRequest {
    /// Request with an empty JSON object payload.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Value::Object(Default::default()),
            headers: BTreeMap::new(),
            culture: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }
}

impl From<CoreAction> for ActionRequest {
    fn from(action: CoreAction) -> Self {
        ActionRequest::new(action.as_str())
    }
}

/// A validated `namespace.domain.verb.name` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActionName<'a> {
    raw: &'a str,
    verb: &'a str,
}

impl<'a> ActionName<'a> {
    pub(crate) fn parse(raw: &'a str) -> ExecResult<Self> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() < 4 {
            return Err(ExecError::MalformedAction(raw.to_string()));
        }
        Ok(Self {
            raw,
            verb: segments[2],
        })
    }

    pub(crate) fn is_get(&self) -> bool {
        self.verb == "get"
    }

    pub(crate) fn as_str(&self) -> &'a str {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_action() {
        let name = ActionName::parse("rbs.product.get.list").unwrap();
        assert!(name.is_get());
        assert_eq!(name.as_str(), "rbs.product.get.list");
    }

    #[test]
    fn test_core_actions_are_post() {
        let name = ActionName::parse(CoreAction::State.as_str()).unwrap();
        assert!(!name.is_get());
    }

    #[test]
    fn test_parse_rejects_short_names() {
        for raw in ["foo.bar", "a.b.get", "", "CONNECT_SOCKET"] {
            assert!(matches!(
                ActionName::parse(raw),
                Err(ExecError::MalformedAction(_))
            ));
        }
    }

    #[test]
    fn test_request_builder() {
        let request = ActionRequest::new("rbs.a.get.b")
            .with_payload(serde_json::json!({"id": 1}))
            .with_header("x-trace", "t1")
            .with_culture("tr-TR");
        assert_eq!(request.payload["id"], 1);
        assert_eq!(request.headers.get("x-trace").map(String::as_str), Some("t1"));
        assert_eq!(request.culture.as_deref(), Some("tr-TR"));
        assert_eq!(ActionRequest::new("x").payload, serde_json::json!({}));
    }

    #[test]
    fn test_core_action_names() {
        assert_eq!(CoreAction::Instance.to_string(), "rbs.core.request.INSTANCE");
        assert_eq!(
            ActionRequest::from(CoreAction::Call).action,
            "rbs.core.request.CALL"
        );
    }
}
