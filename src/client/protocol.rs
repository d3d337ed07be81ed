//! JSON-RPC 2.0 message model
//!
//! The three message shapes of JSON-RPC 2.0 (request, response,
//! notification), distinguished structurally by the presence of `id`,
//! `method`, `result` and `error`. Incoming traffic is decoded into
//! [`Message`] exactly once, at the framing boundary; nothing downstream
//! handles untyped JSON objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version identifier carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error codes as defined in the specification.
/// https://www.jsonrpc.org/specification#error_object
#[allow(dead_code)]
pub mod error_codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ============================================================================
// Message Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: Value,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request with an integer id, the only id shape this client
    /// ever allocates.
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (matches the request)
    pub id: Value,

    /// Result (present if successful)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Whether this response answers the request with the given id.
    pub fn is_for(&self, id: i64) -> bool {
        self.id.as_i64() == Some(id)
    }

    /// Split the response into its payload or its error object.
    ///
    /// A response that carries neither (possible only for hand-built
    /// values; the decoder rejects the shape) yields `Null`, matching the
    /// protocol's convention for void results.
    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object carried inside a failed [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Structural Tagging
// ============================================================================

/// A decoded JSON-RPC message of any of the three shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// The JSON parsed, but it is not a valid JSON-RPC 2.0 message.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized JSON-RPC message shape: {0}")]
pub struct MessageShapeError(pub String);

impl Message {
    /// Classify a JSON value by structure: `method` with an `id` is a
    /// request, `method` without one a notification, and an `id` with
    /// exactly one of `result`/`error` a response.
    pub fn from_value(value: Value) -> Result<Self, MessageShapeError> {
        let object = value
            .as_object()
            .ok_or_else(|| MessageShapeError("payload is not a JSON object".to_string()))?;

        match object.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(MessageShapeError(format!(
                    "unsupported jsonrpc version {other:?}"
                )));
            }
            None => {
                return Err(MessageShapeError(
                    "missing jsonrpc version field".to_string(),
                ));
            }
        }

        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.contains_key("method");

        if has_method {
            let decoded = if has_id {
                serde_json::from_value(value).map(Message::Request)
            } else {
                serde_json::from_value(value).map(Message::Notification)
            };
            return decoded.map_err(|e| MessageShapeError(e.to_string()));
        }

        if has_id {
            let has_result = object.contains_key("result");
            let has_error = object.contains_key("error");
            if has_result == has_error {
                return Err(MessageShapeError(
                    "response must carry exactly one of result/error".to_string(),
                ));
            }
            return serde_json::from_value(value)
                .map(Message::Response)
                .map_err(|e| MessageShapeError(e.to_string()));
        }

        Err(MessageShapeError(
            "message has neither method nor id".to_string(),
        ))
    }

    /// Method name for requests and notifications, `None` for responses.
    #[allow(dead_code)]
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let value = json!({"jsonrpc": "2.0", "id": 7, "method": "initialize", "params": {}});
        match Message::from_value(value).unwrap() {
            Message::Request(request) => {
                assert_eq!(request.id, json!(7));
                assert_eq!(request.method, "initialize");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_notification() {
        let value = json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"message": "hi"}});
        match Message::from_value(value).unwrap() {
            Message::Notification(notification) => {
                assert_eq!(notification.method, "window/logMessage");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_result() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        match Message::from_value(value).unwrap() {
            Message::Response(response) => {
                assert!(response.is_for(1));
                assert!(!response.is_for(2));
                assert_eq!(
                    response.into_result().unwrap(),
                    json!({"capabilities": {}})
                );
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_error() {
        let value = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "method not found"}
        });
        let Message::Response(response) = Message::from_value(value).unwrap() else {
            panic!("expected response");
        };
        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(error.message, "method not found");
    }

    #[test]
    fn test_null_result_is_valid() {
        // LSP shutdown acknowledges with "result": null
        let value = json!({"jsonrpc": "2.0", "id": 3, "result": null});
        let Message::Response(response) = Message::from_value(value).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_reject_result_and_error_together() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 0, "message": ""}});
        assert!(Message::from_value(value).is_err());
    }

    #[test]
    fn test_reject_missing_version() {
        assert!(Message::from_value(json!({"id": 1, "method": "x"})).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "1.0", "id": 1, "method": "x"})).is_err());
    }

    #[test]
    fn test_reject_non_object() {
        assert!(Message::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_serialized_request_omits_empty_params() {
        let request = Request::new(1, "shutdown", None);
        let encoded = serde_json::to_string(&Message::Request(request)).unwrap();
        assert!(!encoded.contains("params"));
        assert!(encoded.contains(r#""jsonrpc":"2.0""#));
    }
}
