//! JSON-RPC dispatch.
//!
//! One frame in, one frame out. The dispatcher resolves
//! `"<identifier>.<function>"` against the hosted entries, routes the
//! function name through the identifier's contract aliases, validates the
//! positional parameters against the declared schema, invokes the target and
//! measures it. Every exit past identifier resolution records an outcome
//! into the health ledger; only invocation-phase failures count as errors
//! there, while validation rejections contribute neutral samples.
//!
//! # Error codes
//!
//! | Code | Condition |
//! |------|-----------|
//! | -32700 | unparseable JSON |
//! | -32600 | not a 2.0 request, missing fields, malformed method string |
//! | -32601 | unknown identifier or method |
//! | -32602 | non-positional, missing or mistyped parameters |
//! | -32603 | the invocation itself failed |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use berth_common::protocol::{JsonRpcError, JsonRpcResponse};
use berth_health::HealthLedger;

use crate::service::{MethodSpec, ServiceEntry};

/// Stateless per-request dispatcher, shared by all connections.
pub struct Dispatcher {
    entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
    ledger: Arc<HealthLedger>,
    timeout_threshold: Duration,
}

impl Dispatcher {
    pub fn new(
        entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
        ledger: Arc<HealthLedger>,
        timeout_threshold: Duration,
    ) -> Self {
        Self {
            entries,
            ledger,
            timeout_threshold,
        }
    }

    /// Process one request frame (without its newline terminator).
    pub fn dispatch_line(&self, line: &str) -> JsonRpcResponse {
        let parsed: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error());
            }
        };

        let Some(request) = parsed.as_object() else {
            return JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::invalid_request("request must be a JSON object"),
            );
        };
        let id = request.get("id").cloned();
        let reply_id = id.clone().unwrap_or(Value::Null);

        if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return JsonRpcResponse::error(
                reply_id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            );
        }
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                reply_id,
                JsonRpcError::invalid_request("method is required"),
            );
        };
        if id.is_none() {
            return JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::invalid_request("id is required"),
            );
        }

        let Some((identifier, func)) = split_method(method) else {
            return JsonRpcResponse::error(
                reply_id,
                JsonRpcError::invalid_request(
                    "method must be \"<identifier>.<function>\"",
                ),
            );
        };

        let Some(entry) = self.entries.get(identifier) else {
            let known: Vec<&str> = self.entries.keys().map(String::as_str).collect();
            return JsonRpcResponse::error(
                reply_id,
                JsonRpcError::method_not_found(&format!(
                    "unknown identifier {identifier:?}, known identifiers: [{}]",
                    known.join(", ")
                )),
            );
        };

        // From here on every exit leaves a sample in the window.
        let Some(target) = entry.resolve(func) else {
            self.ledger.record(identifier, false, false);
            return JsonRpcResponse::error(
                reply_id,
                JsonRpcError::method_not_found(&format!(
                    "service {identifier:?} has no method {func:?}"
                )),
            );
        };

        let args = match validate_params(target, request.get("params")) {
            Ok(args) => args,
            Err(message) => {
                self.ledger.record(identifier, false, false);
                return JsonRpcResponse::error(
                    reply_id,
                    JsonRpcError::invalid_params(&message),
                );
            }
        };

        let started = Instant::now();
        let outcome = target.invoke(&args);
        let elapsed = started.elapsed();
        let timeout = elapsed > self.timeout_threshold;
        debug!(
            identifier,
            method = %target.name,
            elapsed_ms = elapsed.as_millis() as u64,
            timeout,
            "dispatched"
        );

        match outcome {
            Ok(result) => {
                self.ledger.record(identifier, timeout, false);
                JsonRpcResponse::success(reply_id, result)
            }
            Err(message) => {
                self.ledger.record(identifier, timeout, true);
                JsonRpcResponse::error(
                    reply_id,
                    JsonRpcError::internal_error(&format!("method invocation: {message}")),
                )
            }
        }
    }
}

/// Split `"<identifier>.<function>"` at the first dot.
fn split_method(method: &str) -> Option<(&str, &str)> {
    let (identifier, func) = method.split_once('.')?;
    if identifier.is_empty() || func.is_empty() {
        return None;
    }
    Some((identifier, func))
}

/// Check the positional parameter list against the declared schema.
fn validate_params(
    method: &MethodSpec,
    params: Option<&Value>,
) -> std::result::Result<Vec<Value>, String> {
    let args: Vec<Value> = match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(format!(
                "params for {:?} must be a positional list",
                method.name
            ));
        }
    };

    let required = method.required_count();
    if args.len() < required {
        return Err(format!(
            "method {:?} expects at least {required} parameter(s), got {}",
            method.name,
            args.len()
        ));
    }
    if args.len() > method.params.len() {
        return Err(format!(
            "method {:?} expects at most {} parameter(s), got {}",
            method.name,
            method.params.len(),
            args.len()
        ));
    }

    for (value, param) in args.iter().zip(method.params.iter()) {
        if !param.ty.matches(value) {
            return Err(format!(
                "parameter {:?} expects {}, got {}",
                param.name,
                param.ty,
                json_type_name(value)
            ));
        }
    }

    Ok(args)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
