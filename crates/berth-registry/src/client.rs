//! Authenticated REST client for the Nacos registry.
//!
//! Wraps the handful of endpoints the host consumes:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | `login` | `POST /nacos/v1/auth/login` |
//! | `publish_config` | `POST /nacos/v1/cs/configs` |
//! | `get_config` | `GET /nacos/v1/cs/configs` |
//! | `create_instance` | `POST /nacos/v1/ns/instance` |
//! | `send_beat` | `PUT /nacos/v1/ns/instance/beat` |
//! | `update_weight` | `PUT /nacos/v1/ns/instance` |
//! | `remove_instance` | `DELETE /nacos/v1/ns/instance` |
//! | `get_instance_list` | `GET /nacos/v1/ns/instance/list` |
//!
//! The access token is cached inside the client and refreshed 60 seconds
//! before its TTL runs out; a 401/403 on any call invalidates the cache and
//! the call is retried once with a fresh token. Failures never cross this
//! boundary as panics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use berth_common::protocol::error::{HostError, Result};

/// Refresh the token this long before its advertised TTL expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Ceiling on any single registry request.
const REQUEST_CEILING: Duration = Duration::from_secs(60);

/// Group applied when a service name carries no `<group>@@` prefix.
const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// The network instance this process advertises, as the registry sees it.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    /// Safe registry name, optionally prefixed `<group>@@`
    pub service_name: String,
    pub ip: String,
    pub port: u16,
    pub namespace: String,
    /// Flat metadata map; Berth publishes `serviceMetadata` + `description`
    pub metadata: HashMap<String, String>,
    pub ephemeral: bool,
}

impl InstanceRecord {
    fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "tokenTtl")]
    token_ttl: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.saturating_duration_since(now) > TOKEN_REFRESH_MARGIN
    }
}

/// REST client for one Nacos endpoint.
///
/// Cheap to share behind an `Arc`; the underlying `reqwest::Client` pools
/// connections and the token cache is the only mutable state.
pub struct NacosClient {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl NacosClient {
    /// Create a client for `base_url`, e.g. `http://127.0.0.1:8848`.
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_CEILING)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    /// Host and port of the registry, for callers that open raw sockets
    /// (the config long-poll engine).
    pub fn authority(&self) -> Result<(String, u16)> {
        let stripped = self
            .base_url
            .strip_prefix("http://")
            .or_else(|| self.base_url.strip_prefix("https://"))
            .unwrap_or(&self.base_url);
        let authority = stripped.split('/').next().unwrap_or(stripped);
        match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    HostError::Config(format!("invalid registry port in {}", self.base_url))
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((authority.to_string(), 8848)),
        }
    }

    /// Current access token, logging in if the cache is absent or about to
    /// expire.
    pub async fn access_token(&self) -> Result<String> {
        let now = Instant::now();
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(now) {
                    return Ok(token.value.clone());
                }
            }
        }
        self.login().await
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate_token(&self) {
        self.token.write().await.take();
    }

    /// Authenticate and cache the returned token.
    pub async fn login(&self) -> Result<String> {
        let url = format!("{}/nacos/v1/auth/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HostError::Auth(format!(
                "login rejected with {status}: {body}"
            )));
        }
        let reply: LoginReply = serde_json::from_str(&body)
            .map_err(|e| HostError::Auth(format!("unreadable login reply: {e}")))?;
        let token = CachedToken {
            value: reply.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(reply.token_ttl),
        };
        *self.token.write().await = Some(token);
        debug!(ttl = reply.token_ttl, "registry login succeeded");
        Ok(reply.access_token)
    }

    /// Publish a configuration entry.
    pub async fn publish_config(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        tenant: &str,
    ) -> Result<()> {
        self.call(
            Method::POST,
            "/nacos/v1/cs/configs",
            vec![],
            Some(vec![
                ("dataId", data_id.to_string()),
                ("group", group.to_string()),
                ("content", content.to_string()),
                ("tenant", tenant.to_string()),
            ]),
        )
        .await
        .map(drop)
    }

    /// Fetch a configuration entry's current content.
    pub async fn get_config(&self, data_id: &str, group: &str, tenant: &str) -> Result<String> {
        self.call(
            Method::GET,
            "/nacos/v1/cs/configs",
            vec![
                ("dataId", data_id.to_string()),
                ("group", group.to_string()),
                ("tenant", tenant.to_string()),
            ],
            None,
        )
        .await
    }

    /// Register an ephemeral (or persistent) instance.
    pub async fn create_instance(
        &self,
        record: &InstanceRecord,
        weight: f64,
        healthy: bool,
    ) -> Result<()> {
        self.call(
            Method::POST,
            "/nacos/v1/ns/instance",
            vec![],
            Some(vec![
                ("serviceName", qualify(&record.service_name)),
                ("ip", record.ip.clone()),
                ("port", record.port.to_string()),
                ("namespaceId", record.namespace.clone()),
                ("metadata", record.metadata_json()),
                ("weight", weight.to_string()),
                ("healthy", healthy.to_string()),
                ("ephemeral", record.ephemeral.to_string()),
            ]),
        )
        .await
        .map(drop)
    }

    /// Emit one heartbeat carrying the instance's current weight.
    pub async fn send_beat(
        &self,
        record: &InstanceRecord,
        weight: f64,
        interval: Duration,
    ) -> Result<()> {
        let service_name = qualify(&record.service_name);
        let beat = json!({
            "serviceName": service_name,
            "ip": record.ip,
            "port": record.port,
            "weight": weight,
            "metadata": record.metadata,
            "scheduled": true,
            "period": interval.as_millis() as u64,
        });
        self.call(
            Method::PUT,
            "/nacos/v1/ns/instance/beat",
            vec![],
            Some(vec![
                ("serviceName", service_name),
                ("namespaceId", record.namespace.clone()),
                ("beat", beat.to_string()),
            ]),
        )
        .await
        .map(drop)
    }

    /// Update the instance's advertised weight.
    pub async fn update_weight(&self, record: &InstanceRecord, weight: f64) -> Result<()> {
        self.call(
            Method::PUT,
            "/nacos/v1/ns/instance",
            vec![],
            Some(vec![
                ("serviceName", qualify(&record.service_name)),
                ("ip", record.ip.clone()),
                ("port", record.port.to_string()),
                ("weight", weight.to_string()),
                ("namespaceId", record.namespace.clone()),
                ("ephemeral", record.ephemeral.to_string()),
                ("metadata", record.metadata_json()),
            ]),
        )
        .await
        .map(drop)
    }

    /// Deregister the instance.
    pub async fn remove_instance(&self, record: &InstanceRecord) -> Result<()> {
        self.call(
            Method::DELETE,
            "/nacos/v1/ns/instance",
            vec![
                ("serviceName", qualify(&record.service_name)),
                ("ip", record.ip.clone()),
                ("port", record.port.to_string()),
                ("namespaceId", record.namespace.clone()),
                ("ephemeral", record.ephemeral.to_string()),
            ],
            None,
        )
        .await
        .map(drop)
    }

    /// List the registry's view of a service, for shutdown diagnostics.
    pub async fn get_instance_list(
        &self,
        service_name: &str,
        namespace: &str,
        healthy_only: bool,
    ) -> Result<Value> {
        let body = self
            .call(
                Method::GET,
                "/nacos/v1/ns/instance/list",
                vec![
                    ("serviceName", qualify(service_name)),
                    ("namespaceId", namespace.to_string()),
                    ("healthyOnly", healthy_only.to_string()),
                ],
                None,
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// One authenticated request with a single retry on 401/403.
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: Vec<(&'static str, String)>,
        form: Option<Vec<(&'static str, String)>>,
    ) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            let mut request = self.http.request(method.clone(), &url).query(&query);
            request = request.query(&[("accessToken", token.as_str())]);
            if let Some(form) = &form {
                request = request.form(form);
            }
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            match status {
                s if s.is_success() => return Ok(body),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if !refreshed => {
                    warn!(%url, %status, "registry rejected token, re-authenticating");
                    self.invalidate_token().await;
                    refreshed = true;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(HostError::Auth(format!(
                        "{path} rejected with {status} after token refresh"
                    )));
                }
                s => {
                    return Err(HostError::Registry(format!(
                        "{path} returned {s}: {body}"
                    )));
                }
            }
        }
    }
}

/// Apply the default group prefix when the caller did not pick one.
fn qualify(service_name: &str) -> String {
    if service_name.contains("@@") {
        service_name.to_string()
    } else {
        format!("{DEFAULT_GROUP}@@{service_name}")
    }
}
