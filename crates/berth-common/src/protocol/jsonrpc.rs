//! JSON-RPC 2.0 protocol types.
//!
//! Berth exposes hosted services over line-framed JSON-RPC 2.0. A request
//! names its target as `"<identifier>.<function>"` and carries positional
//! parameters:
//!
//! ```json
//! { "jsonrpc":"2.0", "method":"demo.add", "params":["tom",18], "id":"r1" }
//! ```
//!
//! The dispatcher reads request frames as raw `serde_json` values so it can
//! report which envelope field is wrong; only the response side has typed
//! structs here. Responses carry either `result` or `error`, never both,
//! and always echo the request `id`.
//!
//! # Error codes
//!
//! Standard JSON-RPC 2.0 error codes:
//! - `-32700`: parse error
//! - `-32600`: invalid request (including a malformed method string)
//! - `-32601`: unknown identifier or method
//! - `-32602`: invalid params
//! - `-32603`: internal error (method invocation failure)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid JSON was received by the server
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// The identifier or method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i32 = -32602;
/// Method invocation failed
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 response.
///
/// Exactly one of `result` / `error` is present; the absent one is omitted
/// from the serialized frame entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request identifier (matches the request, `null` when it was unreadable)
    pub id: Value,
    /// Result value on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code (standard codes are negative integers)
    pub code: i32,
    /// Short description of the error
    pub message: String,
}

impl JsonRpcError {
    /// Create a parse error (-32700)
    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "parse error".into(),
        }
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request(msg: &str) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: msg.into(),
        }
    }

    /// Create a method not found error (-32601)
    pub fn method_not_found(msg: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: msg.into(),
        }
    }

    /// Create an invalid params error (-32602)
    pub fn invalid_params(msg: &str) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: msg.into(),
        }
    }

    /// Create an internal error (-32603)
    pub fn internal_error(msg: &str) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: msg.into(),
        }
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize into a newline-terminated wire frame.
    ///
    /// Serialization of a value built from `serde_json::Value` parts cannot
    /// fail, so this is infallible.
    pub fn to_frame(&self) -> String {
        let mut frame = serde_json::to_string(self).unwrap_or_else(|_| {
            // Unreachable for Value-backed fields; keep the peer alive anyway.
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"response serialization"}}"#
                .to_string()
        });
        frame.push('\n');
        frame
    }
}
