//! The Berth service host.
//!
//! A single [`Host`] process registers one network instance against a Nacos
//! registry under several service identifiers, serves them over line-framed
//! JSON-RPC 2.0, and keeps each identifier's registration alive and honest:
//!
//! - **[`service`]**: hosted implementations describe their methods through
//!   [`ServiceBuilder`], yielding the parameter schema that is advertised in
//!   the instance metadata and enforced by the dispatcher.
//! - **[`registrar`]**: resolves configured identifiers against the
//!   [`ServiceCatalog`] and performs the initial (fatal-on-failure)
//!   registration.
//! - **[`dispatch`]** + **[`transport`]**: the TCP listener, per-connection
//!   framing, and the JSON-RPC dispatch algorithm, which measures every call
//!   and records its outcome.
//! - **[`heartbeat`]**: periodic beats per identifier, gated by the health
//!   controller's circuit state and carrying its current weight.
//! - **[`host`]**: wires everything to the config long-poll watchers and
//!   drives startup, the periodic health evaluation and graceful shutdown.
//!
//! # Example
//!
//! ```no_run
//! use berth_common::HostConfig;
//! use berth_host::{Host, ParamSpec, ParamType, ServiceBuilder, ServiceCatalog};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> berth_common::Result<()> {
//!     let mut catalog = ServiceCatalog::new();
//!     catalog.register("examples.demo.DemoService", || {
//!         ServiceBuilder::new("examples.demo.DemoService")
//!             .method(
//!                 "add",
//!                 vec![
//!                     ParamSpec::required("name", ParamType::String),
//!                     ParamSpec::required("age", ParamType::Int),
//!                 ],
//!                 |args| Ok(json!(format!("{}:{}", args[0], args[1]))),
//!             )
//!             .build()
//!     });
//!
//!     let config = HostConfig::load("berth.toml")?;
//!     let mut host = Host::new(config, &catalog)?;
//!     host.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod heartbeat;
pub mod host;
pub mod registrar;
pub mod service;
pub mod transport;

pub use dispatch::Dispatcher;
pub use host::Host;
pub use service::{
    safe_registry_name, sanitize, MethodSpec, ParamSpec, ParamType, ServiceBuilder,
    ServiceCatalog, ServiceEntry, ServiceImpl,
};
pub use transport::RpcServer;
