//! Startup-time resolution and registration of hosted services.
//!
//! Both steps are fatal on failure: an enabled identifier whose
//! implementation cannot be resolved, or whose initial registration the
//! registry refuses, aborts startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use berth_common::config::HostConfig;
use berth_common::protocol::error::{HostError, Result};
use berth_health::HealthLedger;
use berth_registry::NacosClient;

use crate::service::{ServiceCatalog, ServiceEntry};

/// Instantiate every enabled service spec against the catalog.
pub fn build_entries(
    config: &HostConfig,
    catalog: &ServiceCatalog,
) -> Result<BTreeMap<String, Arc<ServiceEntry>>> {
    let mut entries = BTreeMap::new();
    for (key, spec) in config.enabled_services() {
        let service = catalog.instantiate(&spec.service_name).ok_or_else(|| {
            HostError::Service(format!(
                "implementation {:?} for service {key:?} is not in the catalog",
                spec.service_name
            ))
        })?;
        let entry = ServiceEntry::new(key, &spec.namespace, spec.contract.clone(), service);
        info!(
            identifier = %key,
            implementation = %spec.service_name,
            methods = entry.service().methods().len(),
            safe_name = %entry.safe_name,
            "service bound"
        );
        entries.insert(key.clone(), Arc::new(entry));
    }
    Ok(entries)
}

/// Register every entry as an ephemeral, healthy instance at base weight.
pub async fn register_all(
    client: &NacosClient,
    ledger: &HealthLedger,
    entries: &BTreeMap<String, Arc<ServiceEntry>>,
    ip: &str,
    port: u16,
    base_weight: f64,
) -> Result<()> {
    for (key, entry) in entries {
        let record = entry.instance_record(ip, port);
        client
            .create_instance(&record, base_weight, true)
            .await
            .map_err(|e| {
                HostError::Registry(format!("initial registration of {key:?} failed: {e}"))
            })?;
        ledger.register(key);
        info!(identifier = %key, safe_name = %entry.safe_name, weight = base_weight, "service registered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;

    fn config(toml: &str) -> HostConfig {
        HostConfig::from_toml(toml).unwrap()
    }

    const BASE: &str = r#"
        [server]
        host = "http://localhost:8848"
        username = "u"
        password = "p"

        [instance]
        ip = "127.0.0.1"
        port = 9090
    "#;

    #[test]
    fn resolves_enabled_services() {
        let toml = format!(
            "{BASE}\n[service.demo]\nservice_name = \"examples.demo.DemoService\"\n"
        );
        let mut catalog = ServiceCatalog::new();
        catalog.register("examples.demo.DemoService", || {
            ServiceBuilder::new("examples.demo.DemoService").build()
        });

        let entries = build_entries(&config(&toml), &catalog).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["demo"].safe_name, "SERVICE@@demo");
    }

    #[test]
    fn unresolvable_implementation_is_fatal() {
        let toml = format!(
            "{BASE}\n[service.demo]\nservice_name = \"examples.demo.Missing\"\n"
        );
        let catalog = ServiceCatalog::new();
        let err = build_entries(&config(&toml), &catalog).unwrap_err();
        assert!(err.to_string().contains("examples.demo.Missing"));
    }

    #[test]
    fn disabled_services_are_not_resolved() {
        let toml = format!(
            "{BASE}\n[service.off]\nenable = false\nservice_name = \"examples.demo.Missing\"\n"
        );
        let catalog = ServiceCatalog::new();
        let entries = build_entries(&config(&toml), &catalog).unwrap();
        assert!(entries.is_empty());
    }
}
