//! Shared types for the Berth service host.
//!
//! This crate holds everything the other Berth crates agree on:
//!
//! - **[`protocol`]**: JSON-RPC 2.0 request/response/error types and the
//!   standard error codes, plus the central [`HostError`] enum.
//! - **[`config`]**: the immutable host configuration model, loaded from a
//!   TOML file at startup.
//!
//! # Example
//!
//! ```
//! use berth_common::protocol::{JsonRpcResponse, JsonRpcError};
//! use serde_json::json;
//!
//! let ok = JsonRpcResponse::success(json!("r1"), json!(42));
//! let err = JsonRpcResponse::error(json!("r2"), JsonRpcError::method_not_found("no such method"));
//! assert_eq!(ok.jsonrpc, "2.0");
//! assert_eq!(err.error.unwrap().code, -32601);
//! ```

pub mod config;
pub mod protocol;

pub use config::{ConfigSpec, HostConfig, ServiceSpec};
pub use protocol::error::{HostError, Result};
