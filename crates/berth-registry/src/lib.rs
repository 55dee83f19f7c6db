//! Nacos registry integration for the Berth host.
//!
//! Two very different wire disciplines live here:
//!
//! - **[`client`]**: short-lived, authenticated REST calls (login, instance
//!   register/deregister, heartbeat, weight update, config fetch/publish).
//!   These ride on `reqwest`; the token is cached process-wide and refreshed
//!   transparently before it expires.
//! - **[`longpoll`]**: the config center's change notification channel. Each
//!   watched entry keeps one persistent TCP connection on which HTTP/1.1
//!   long-poll exchanges are framed by hand ([`wire`]), because the
//!   connection must outlive individual requests and be re-armed in place.
//!
//! Nothing in this crate panics on registry failures: every call returns a
//! `Result` and callers decide whether a failure is fatal (initial
//! registration) or advisory (a missed heartbeat).

pub mod client;
pub mod longpoll;
pub mod wire;

pub use client::{InstanceRecord, NacosClient};
pub use longpoll::{ConfigSink, ConfigWatcher, WatchSpec};
