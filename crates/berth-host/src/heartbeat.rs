//! Heartbeat scheduling.
//!
//! Every tick, each enabled identifier either gets a beat carrying its
//! current weight or is skipped because its circuit is open. Beat failures
//! are advisory: the next tick simply tries again, and the registry marks
//! the ephemeral instance unhealthy on its own if beats stay missing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use berth_health::HealthLedger;
use berth_registry::NacosClient;

use crate::service::ServiceEntry;

pub struct HeartbeatScheduler {
    client: Arc<NacosClient>,
    ledger: Arc<HealthLedger>,
    entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
    ip: String,
    port: u16,
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(
        client: Arc<NacosClient>,
        ledger: Arc<HealthLedger>,
        entries: Arc<BTreeMap<String, Arc<ServiceEntry>>>,
        ip: &str,
        port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            ledger,
            entries,
            ip: ip.to_string(),
            port,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.beat_all().await;
        }
    }

    /// One heartbeat round: beats for different identifiers go out in
    /// parallel, each at most once per round.
    pub async fn beat_all(&self) {
        let beats: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                if !self.ledger.gate_open(key) {
                    info!(identifier = %key, "heartbeat stopped while circuit is open");
                    return None;
                }
                let weight = self.ledger.weight_of(key);
                let record = entry.instance_record(&self.ip, self.port);
                let client = self.client.clone();
                let interval = self.interval;
                let key = key.clone();
                Some(async move {
                    if let Err(e) = client.send_beat(&record, weight, interval).await {
                        warn!(identifier = %key, error = %e, "heartbeat failed");
                    }
                })
            })
            .collect();
        futures::future::join_all(beats).await;
    }
}
