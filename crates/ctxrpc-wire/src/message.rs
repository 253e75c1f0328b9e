use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize};

use crate::codes::ErrorDescriptor;
use crate::error::{Result, WireError};
use crate::id::CorrelationId;
use crate::value::WireValue;

/// The `_meta.action` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Call,
    Return,
    Cleanup,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Call => "call",
            Action::Return => "return",
            Action::Cleanup => "cleanup",
        }
    }
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(WireValue),
    Error(ErrorDescriptor),
}

/// Action-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Call {
        method: String,
        params: Vec<WireValue>,
    },
    Return(Outcome),
    /// The function named by the id's action segment is no longer needed.
    Cleanup,
}

impl Body {
    pub fn action(&self) -> Action {
        match self {
            Body::Call { .. } => Action::Call,
            Body::Return(_) => Action::Return,
            Body::Cleanup => Action::Cleanup,
        }
    }
}

/// A decoded message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: CorrelationId,
    /// Milliseconds since the Unix epoch at creation.
    pub timestamp: u64,
    pub body: Body,
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    action: Action,
    #[serde(default)]
    timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawMessage {
    id: String,
    #[serde(rename = "_meta")]
    meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Vec<WireValue>>,
    // `"result": null` is a successful null result, not an absent field.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDescriptor>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<WireValue>, D::Error>
where
    D: Deserializer<'de>,
{
    WireValue::deserialize(deserializer).map(Some)
}

impl Message {
    /// A call to `method` on the endpoint named in `id`.
    pub fn call(id: CorrelationId, method: impl Into<String>, params: Vec<WireValue>) -> Self {
        Self::with_body(
            id,
            Body::Call {
                method: method.into(),
                params,
            },
        )
    }

    /// A return answering the call with the same `id`.
    pub fn reply(id: CorrelationId, outcome: Outcome) -> Self {
        Self::with_body(id, Body::Return(outcome))
    }

    /// A cleanup notice for the function whose id is `id.action`.
    pub fn cleanup(id: CorrelationId) -> Self {
        Self::with_body(id, Body::Cleanup)
    }

    fn with_body(id: CorrelationId, body: Body) -> Self {
        Self {
            id,
            timestamp: now_millis(),
            body,
        }
    }

    pub fn action(&self) -> Action {
        self.body.action()
    }

    /// Encode as the JSON envelope.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut raw = RawMessage {
            id: self.id.encode()?,
            meta: Meta {
                action: self.action(),
                timestamp: self.timestamp,
            },
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match &self.body {
            Body::Call { method, params } => {
                raw.method = Some(method.clone());
                raw.params = Some(params.clone());
            }
            Body::Return(Outcome::Result(value)) => raw.result = Some(value.clone()),
            Body::Return(Outcome::Error(error)) => raw.error = Some(error.clone()),
            Body::Cleanup => {}
        }
        Ok(serde_json::to_value(raw)?)
    }

    /// Decode and validate a JSON envelope.
    ///
    /// A call without `params` is treated as a call with no arguments.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let raw: RawMessage = serde_json::from_value(value)?;
        let id = CorrelationId::decode(&raw.id)?;
        let body = match raw.meta.action {
            Action::Call => Body::Call {
                method: raw.method.ok_or(WireError::MissingField("method"))?,
                params: raw.params.unwrap_or_default(),
            },
            Action::Return => match (raw.result, raw.error) {
                (Some(result), None) => Body::Return(Outcome::Result(result)),
                (None, Some(error)) => Body::Return(Outcome::Error(error)),
                _ => return Err(WireError::AmbiguousReturn),
            },
            Action::Cleanup => Body::Cleanup,
        };
        Ok(Self {
            id,
            timestamp: raw.meta.timestamp,
            body,
        })
    }
}

/// Current time in milliseconds since the Unix epoch (0 if the clock is
/// before it).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id() -> CorrelationId {
        CorrelationId::new("main", "math", "a1").unwrap()
    }

    #[test]
    fn call_envelope_shape() {
        let message = Message::call(id(), "sum", vec![WireValue::Number(1.into())]);
        let value = message.to_json().unwrap();
        assert_eq!(value["id"], "main/math/a1");
        assert_eq!(value["_meta"]["action"], "call");
        assert!(value["_meta"]["timestamp"].as_u64().unwrap() > 0);
        assert_eq!(value["method"], "sum");
        assert_eq!(value["params"], json!([1]));
        assert!(value.get("result").is_none());

        assert_eq!(Message::from_json(value).unwrap(), message);
    }

    #[test]
    fn null_result_is_a_result() {
        let parsed = Message::from_json(json!({
            "id": "main/math/a1",
            "_meta": {"action": "return", "timestamp": 1},
            "result": null
        }))
        .unwrap();
        assert_eq!(parsed.body, Body::Return(Outcome::Result(WireValue::Null)));

        let encoded = parsed.to_json().unwrap();
        assert!(encoded.as_object().unwrap().contains_key("result"));
    }

    #[test]
    fn error_return_decodes() {
        let parsed = Message::from_json(json!({
            "id": "main/math/a1",
            "_meta": {"action": "return", "timestamp": 1},
            "error": {"code": -32603, "message": "boom"}
        }))
        .unwrap();
        assert_eq!(
            parsed.body,
            Body::Return(Outcome::Error(ErrorDescriptor::internal("boom")))
        );
    }

    #[test]
    fn return_needs_exactly_one_outcome() {
        let neither = json!({"id": "a/b/c", "_meta": {"action": "return", "timestamp": 1}});
        assert!(matches!(
            Message::from_json(neither),
            Err(WireError::AmbiguousReturn)
        ));

        let both = json!({
            "id": "a/b/c",
            "_meta": {"action": "return", "timestamp": 1},
            "result": 1,
            "error": {"code": -32603, "message": "x"}
        });
        assert!(matches!(
            Message::from_json(both),
            Err(WireError::AmbiguousReturn)
        ));
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let no_meta = json!({"id": "a/b/c", "method": "x", "params": []});
        assert!(matches!(Message::from_json(no_meta), Err(WireError::Json(_))));

        let bad_id = json!({"id": "a/b", "_meta": {"action": "cleanup", "timestamp": 1}});
        assert!(matches!(
            Message::from_json(bad_id),
            Err(WireError::SegmentCount { .. })
        ));

        let no_method = json!({"id": "a/b/c", "_meta": {"action": "call", "timestamp": 1}});
        assert!(matches!(
            Message::from_json(no_method),
            Err(WireError::MissingField("method"))
        ));

        let unknown_action = json!({"id": "a/b/c", "_meta": {"action": "ping", "timestamp": 1}});
        assert!(Message::from_json(unknown_action).is_err());

        assert!(Message::from_json(json!("not an object")).is_err());
    }

    #[test]
    fn cleanup_has_no_payload() {
        let message = Message::cleanup(CorrelationId::new("main", "math", "fn-1").unwrap());
        let value = message.to_json().unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(Message::from_json(value).unwrap().action(), Action::Cleanup);
    }
}
