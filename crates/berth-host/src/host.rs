//! Host lifecycle: startup, periodic control, graceful shutdown.
//!
//! Startup order matters: implementations are resolved and registered
//! first (both fatal on failure), then the transport comes up, then the
//! recurring tasks start: heartbeats at the configured cadence, health
//! evaluation every five seconds, and one config long-poll watcher per
//! enabled entry. Shutdown is idempotent and deregisters every identifier
//! exactly once before the tasks are torn down.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use berth_common::config::HostConfig;
use berth_common::protocol::error::Result;
use berth_health::{HealthLedger, EVAL_PERIOD};
use berth_registry::{ConfigSink, ConfigWatcher, NacosClient, WatchSpec};

use crate::dispatch::Dispatcher;
use crate::heartbeat::HeartbeatScheduler;
use crate::registrar;
use crate::service::{ServiceCatalog, ServiceEntry};
use crate::transport::RpcServer;

/// One service host process.
pub struct Host {
    config: HostConfig,
    client: Arc<NacosClient>,
    ledger: Arc<HealthLedger>,
    entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
    sinks: HashMap<String, ConfigSink>,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Resolve the configured services against the catalog.
    ///
    /// Fails when an enabled implementation is missing; nothing has been
    /// registered yet at that point.
    pub fn new(config: HostConfig, catalog: &ServiceCatalog) -> Result<Self> {
        let client = Arc::new(NacosClient::new(
            &config.server.host,
            &config.server.username,
            &config.server.password,
        )?);
        let entries = Arc::new(registrar::build_entries(&config, catalog)?);
        let ledger = Arc::new(HealthLedger::new(
            config.instance.weight,
            config.health.stat_window_size,
            Duration::from_secs(config.health.adjust_cool_down),
        ));
        info!(
            services = entries.len(),
            configs = config.enabled_configs().count(),
            "host initialized"
        );
        Ok(Self {
            config,
            client,
            ledger,
            entries,
            sinks: HashMap::new(),
            local_addr: None,
            tasks: Vec::new(),
            stopped: false,
        })
    }

    /// Install the sink invoked when the named config entry changes.
    ///
    /// Entries without a sink still keep their long-poll stream alive; the
    /// change is logged and dropped.
    pub fn add_config_sink(&mut self, name: &str, sink: ConfigSink) {
        self.sinks.insert(name.to_string(), sink);
    }

    /// Shared health statistics, for diagnostics and embedders.
    pub fn health(&self) -> Arc<HealthLedger> {
        self.ledger.clone()
    }

    /// Where the transport actually listens (set by [`Host::start`]).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Register everything and bring up transport, timers and watchers.
    pub async fn start(&mut self) -> Result<()> {
        let instance = self.config.instance.clone();

        registrar::register_all(
            &self.client,
            &self.ledger,
            &self.entries,
            &instance.ip,
            instance.port,
            instance.weight,
        )
        .await?;

        let server = RpcServer::bind(instance.port)?;
        let bound = server.local_addr()?;
        self.local_addr = Some(bound);
        let dispatcher = Arc::new(Dispatcher::new(
            self.entries.clone(),
            self.ledger.clone(),
            Duration::from_millis(instance.timeout_threshold),
        ));
        self.tasks.push(tokio::spawn(server.run(dispatcher)));
        info!(addr = %bound, advertised = %instance.ip, "transport listening");

        let heartbeat = HeartbeatScheduler::new(
            self.client.clone(),
            self.ledger.clone(),
            self.entries.clone(),
            &instance.ip,
            instance.port,
            Duration::from_secs(self.config.server.heartbeat_interval),
        );
        self.tasks.push(heartbeat.spawn());

        self.tasks.push(tokio::spawn(evaluation_loop(
            self.client.clone(),
            self.ledger.clone(),
            self.entries.clone(),
            instance.ip.clone(),
            instance.port,
        )));

        self.start_config_watchers().await;

        info!("host started");
        Ok(())
    }

    async fn start_config_watchers(&mut self) {
        let watched: Vec<(String, berth_common::config::ConfigSpec)> = self
            .config
            .enabled_configs()
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect();

        for (name, spec) in watched {
            let initial_content = match std::fs::read_to_string(&spec.file) {
                Ok(content) => content,
                Err(_) => {
                    info!(entry = %name, file = %spec.file, "no local config file, starting empty");
                    String::new()
                }
            };

            if spec.publish {
                match self
                    .client
                    .publish_config(&spec.data_id, &spec.group, &initial_content, &spec.tenant)
                    .await
                {
                    Ok(()) => info!(entry = %name, data_id = %spec.data_id, "config published"),
                    Err(e) => warn!(entry = %name, error = %e, "publish on start failed"),
                }
            }

            let sink = self.sinks.remove(&name).unwrap_or_else(|| {
                let entry = name.clone();
                Box::new(move |_: &str| {
                    info!(entry = %entry, "config changed (no sink installed)");
                })
            });
            let watcher = ConfigWatcher::new(
                self.client.clone(),
                WatchSpec {
                    name: name.clone(),
                    data_id: spec.data_id.clone(),
                    group: spec.group.clone(),
                    tenant: spec.tenant.clone(),
                    initial_content,
                },
                sink,
            );
            self.tasks.push(watcher.spawn());
            info!(entry = %name, data_id = %spec.data_id, group = %spec.group, "config watch started");
        }
    }

    /// Deregister every identifier and stop all tasks. Safe to call twice.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        for (key, entry) in self.entries.iter() {
            let record = entry.instance_record(&self.config.instance.ip, self.config.instance.port);
            match self.client.remove_instance(&record).await {
                Ok(()) => info!(identifier = %key, "instance deregistered"),
                Err(e) => error!(identifier = %key, error = %e, "deregistration failed"),
            }
            if tracing::enabled!(tracing::Level::DEBUG) {
                if let Ok(listing) = self
                    .client
                    .get_instance_list(&entry.safe_name, &entry.namespace, false)
                    .await
                {
                    tracing::debug!(identifier = %key, %listing, "registry view after deregistration");
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("host stopped");
    }
}

/// Periodic health evaluation: apply gate decisions locally, push weight
/// decisions to the registry and commit them only on success.
async fn evaluation_loop(
    client: Arc<NacosClient>,
    ledger: Arc<HealthLedger>,
    entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
    ip: String,
    port: u16,
) {
    let mut ticker = tokio::time::interval(EVAL_PERIOD);
    loop {
        ticker.tick().await;
        for (key, entry) in entries.iter() {
            let now = Instant::now();
            let decision = ledger.evaluate(key, now);
            if decision.is_noop() {
                continue;
            }

            if let Some(open) = decision.gate {
                ledger.set_gate(key, open, now);
                if open {
                    info!(identifier = %key, "error rate recovered, heartbeats resume");
                } else {
                    warn!(identifier = %key, "error rate too high, stopping heartbeats");
                }
            }

            if let Some(weight) = decision.weight {
                let record = entry.instance_record(&ip, port);
                match client.update_weight(&record, weight).await {
                    Ok(()) => {
                        ledger.commit_weight(key, weight, now);
                        info!(identifier = %key, weight, "advertised weight adjusted");
                    }
                    Err(e) => {
                        warn!(identifier = %key, error = %e, "weight update failed, keeping current weight");
                    }
                }
            }
        }
    }
}
