//! Host configuration.
//!
//! Loaded once from a TOML file at startup and immutable afterwards.
//! Invalid configuration aborts startup.
//!
//! # Sections
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `server` | Registry endpoint, credentials, heartbeat cadence |
//! | `instance` | Advertised address, base weight, timeout threshold |
//! | `health` | Statistics window size and adjustment cooldown |
//! | `service.<k>` | One block per hosted service identifier |
//! | `config.<name>` | One block per watched configuration entry |
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "http://127.0.0.1:8848"
//! username = "nacos"
//! password = "nacos"
//! heartbeat_interval = 5
//!
//! [instance]
//! ip = "192.168.1.20"
//! port = 9090
//! weight = 100.0
//! timeout_threshold = 50
//!
//! [health]
//! stat_window_size = 10
//! adjust_cool_down = 5
//!
//! [service.demo]
//! enable = true
//! service_name = "examples.demo.DemoService"
//! namespace = "public"
//!
//! [service.login]
//! enable = true
//! service_name = "examples.auth.LoginService"
//! namespace = "public"
//! contract = { out = "logout" }
//!
//! [config.app]
//! enable = true
//! publish = false
//! data_id = "app"
//! group = "default"
//! file = "app.conf"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::protocol::error::{HostError, Result};

/// Smallest statistics window the health controller accepts.
pub const MIN_STAT_WINDOW: usize = 10;

/// Root configuration, one per host process.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub instance: InstanceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub service: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigSpec>,
}

/// Registry endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the registry, e.g. `http://127.0.0.1:8848`
    pub host: String,
    pub username: String,
    pub password: String,
    /// Heartbeat cadence in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
}

/// The single network instance this process advertises.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Advertised IP (may differ from the bind address, which is always
    /// `0.0.0.0`)
    pub ip: String,
    pub port: u16,
    /// Base weight `W0`; the health controller degrades from and recovers
    /// toward this value
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Per-call latency threshold in milliseconds beyond which a call counts
    /// as a timeout
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u64,
}

/// Health controller tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Rolling window capacity per identifier
    #[serde(default = "default_stat_window")]
    pub stat_window_size: usize,
    /// Minimum seconds between two weight adjustments, and between two gate
    /// toggles, for a given identifier
    #[serde(default = "default_cool_down")]
    pub adjust_cool_down: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stat_window_size: default_stat_window(),
            adjust_cool_down: default_cool_down(),
        }
    }
}

/// One hosted service identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Qualified implementation name, resolved against the service catalog
    /// at startup
    pub service_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Alias map from externally visible function names to real method names
    #[serde(default)]
    pub contract: BTreeMap<String, String>,
}

/// One watched configuration entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSpec {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Push the local file's content to the registry before watching begins
    #[serde(default)]
    pub publish: bool,
    pub data_id: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Local file holding the entry's content; seeds the first listener
    /// digest and serves as the default sink destination
    pub file: String,
}

fn default_heartbeat_interval() -> u64 {
    5
}
fn default_weight() -> f64 {
    100.0
}
fn default_timeout_threshold() -> u64 {
    1000
}
fn default_stat_window() -> usize {
    MIN_STAT_WINDOW
}
fn default_cool_down() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_namespace() -> String {
    "public".to_string()
}
fn default_group() -> String {
    "default".to_string()
}
fn default_tenant() -> String {
    "public".to_string()
}

impl HostConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HostError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(HostError::Config("server.host must not be empty".into()));
        }
        if self.server.heartbeat_interval == 0 {
            return Err(HostError::Config(
                "server.heartbeat_interval must be at least 1 second".into(),
            ));
        }
        if !(self.instance.weight > 0.0) {
            return Err(HostError::Config(format!(
                "instance.weight must be positive, got {}",
                self.instance.weight
            )));
        }
        if self.health.stat_window_size < MIN_STAT_WINDOW {
            return Err(HostError::Config(format!(
                "health.stat_window_size must be at least {MIN_STAT_WINDOW}, got {}",
                self.health.stat_window_size
            )));
        }
        for (key, spec) in &self.service {
            if spec.enable && spec.service_name.trim().is_empty() {
                return Err(HostError::Config(format!(
                    "service.{key}.service_name must not be empty"
                )));
            }
        }
        for (name, spec) in &self.config {
            if spec.enable && spec.data_id.trim().is_empty() {
                return Err(HostError::Config(format!(
                    "config.{name}.data_id must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Identifiers of enabled services, in stable order.
    pub fn enabled_services(&self) -> impl Iterator<Item = (&String, &ServiceSpec)> {
        self.service.iter().filter(|(_, s)| s.enable)
    }

    /// Names of enabled config entries, in stable order.
    pub fn enabled_configs(&self) -> impl Iterator<Item = (&String, &ConfigSpec)> {
        self.config.iter().filter(|(_, c)| c.enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [server]
        host = "http://127.0.0.1:8848"
        username = "nacos"
        password = "nacos"
        heartbeat_interval = 5

        [instance]
        ip = "192.168.1.20"
        port = 9090
        weight = 100.0
        timeout_threshold = 50

        [health]
        stat_window_size = 10
        adjust_cool_down = 5

        [service.demo]
        enable = true
        service_name = "examples.demo.DemoService"
        namespace = "public"

        [service.login]
        service_name = "examples.auth.LoginService"
        contract = { out = "logout" }

        [service.disabled]
        enable = false
        service_name = "examples.misc.Unused"

        [config.app]
        data_id = "app"
        group = "default"
        file = "app.conf"
    "#;

    #[test]
    fn full_config_parses() {
        let cfg = HostConfig::from_toml(FULL).unwrap();
        assert_eq!(cfg.server.host, "http://127.0.0.1:8848");
        assert_eq!(cfg.instance.port, 9090);
        assert_eq!(cfg.instance.weight, 100.0);
        assert_eq!(cfg.health.adjust_cool_down, 5);
        assert_eq!(cfg.service.len(), 3);
        assert_eq!(cfg.config.len(), 1);
    }

    #[test]
    fn contract_aliases_are_preserved() {
        let cfg = HostConfig::from_toml(FULL).unwrap();
        let login = &cfg.service["login"];
        assert_eq!(login.contract.get("out").map(String::as_str), Some("logout"));
    }

    #[test]
    fn enabled_services_skips_disabled_entries() {
        let cfg = HostConfig::from_toml(FULL).unwrap();
        let keys: Vec<_> = cfg.enabled_services().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["demo", "login"]);
    }

    #[test]
    fn defaults_apply_when_sections_are_omitted() {
        let cfg = HostConfig::from_toml(
            r#"
            [server]
            host = "http://localhost:8848"
            username = "u"
            password = "p"

            [instance]
            ip = "127.0.0.1"
            port = 9090
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.heartbeat_interval, 5);
        assert_eq!(cfg.instance.weight, 100.0);
        assert_eq!(cfg.health.stat_window_size, MIN_STAT_WINDOW);
        assert!(cfg.service.is_empty());
    }

    #[test]
    fn too_small_window_is_rejected() {
        let err = HostConfig::from_toml(
            r#"
            [server]
            host = "http://localhost:8848"
            username = "u"
            password = "p"

            [instance]
            ip = "127.0.0.1"
            port = 9090

            [health]
            stat_window_size = 5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stat_window_size"));
    }

    #[test]
    fn zero_weight_is_rejected() {
        let err = HostConfig::from_toml(
            r#"
            [server]
            host = "http://localhost:8848"
            username = "u"
            password = "p"

            [instance]
            ip = "127.0.0.1"
            port = 9090
            weight = 0.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("weight"));
    }

    #[test]
    fn load_reads_from_disk() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), FULL).unwrap();
        let cfg = HostConfig::load(file.path()).unwrap();
        assert_eq!(cfg.instance.ip, "192.168.1.20");
    }
}
