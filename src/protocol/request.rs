//! JSON-RPC request and response message types.
//!
//! Node endpoints speak JSON-RPC 2.0 over the WebSocket. Requests carry a
//! numeric id that the node echoes back in the matching response.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// JSON-RPC protocol version marker.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request
// ============================================================================

/// A JSON-RPC call from the local end to the node.
///
/// # Format
///
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "method": "system_chain", "params": [] }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: &'static str,

    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// RPC method name.
    pub method: String,

    /// Positional or named parameters.
    pub params: Value,
}

impl Request {
    /// Creates a new request with an auto-generated id.
    ///
    /// `Value::Null` params are sent as an empty array.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(RequestId::generate(), method, params)
    }

    /// Creates a new request with a specific id.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = if params.is_null() {
            Value::Array(Vec::new())
        } else {
            params
        };

        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,

    /// Error message.
    pub message: String,

    /// Optional extra data.
    #[serde(default)]
    pub data: Option<Value>,
}

// ============================================================================
// Response
// ============================================================================

/// A JSON-RPC response from the node.
///
/// # Format
///
/// Success:
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "result": "Development" }
/// ```
///
/// Error:
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "Method not found" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Response {
    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, returning error if the node reported one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the response carried an error object.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::rpc(error.code, error.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Gets a string value from an object result.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.result
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Returns the array stored under `key` in an object result.
    #[inline]
    #[must_use]
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.result
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_array())
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
    fn test_request_serialization() {
        let request = Request::with_id(RequestId::from_u64(7), "system_chain", Value::Null);
        let json = serde_json::to_value(&request).expect("serialize");

        assert_eq!(
            json,
            json!({ "jsonrpc": "2.0", "id": 7, "method": "system_chain", "params": [] })
        );
    }

    #[test]
    fn test_request_keeps_params() {
        let request = Request::new("state_getStorage", json!(["0x26aa"]));
        assert_eq!(request.params, json!(["0x26aa"]));
    }

    #[test]
    fn test_success_response() {
        let json_str = r#"{ "jsonrpc": "2.0", "id": 3, "result": { "methods": ["a", "b"] } }"#;

        let response: Response = serde_json::from_str(json_str).expect("parse");
        assert!(response.is_success());
        assert_eq!(response.id, RequestId::from_u64(3));
        assert_eq!(response.get_array("methods").map(Vec::len), Some(2));
    }

    #[test]
    fn test_error_response() {
        let json_str = r#"{
            "jsonrpc": "2.0",
            "id": 4,
            "error": { "code": -32601, "message": "Method not found" }
        }"#;

        let response: Response = serde_json::from_str(json_str).expect("parse");
        assert!(response.is_error());

        match response.into_result() {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_into_result_null_result() {
        let response: Response =
            serde_json::from_str(r#"{ "jsonrpc": "2.0", "id": 5, "result": null }"#)
                .expect("parse");
        assert_eq!(response.into_result().expect("success"), Value::Null);
    }

    #[test]
    fn test_get_string_defaults() {
        let response: Response =
            serde_json::from_str(r#"{ "jsonrpc": "2.0", "id": 6, "result": { "name": "node" } }"#)
                .expect("parse");
        assert_eq!(response.get_string("name"), "node");
        assert_eq!(response.get_string("missing"), "");
    }
}
