//! Berth wire protocol.
//!
//! Inbound RPC traffic is line-framed JSON-RPC 2.0: each request is a single
//! JSON object terminated by `\n`, and each response is written back the same
//! way. The types here are shared between the dispatcher, the transport and
//! the test suites.

pub mod error;
pub mod jsonrpc;

pub use error::{HostError, Result};
pub use jsonrpc::{
    JsonRpcError, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
