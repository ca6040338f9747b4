//! Pure projection of merged resource + metrics state into the overview
//! view-model. No I/O and no mutation; callers render the result.

use serde::{Deserialize, Serialize};
use vantage_core::{model, DescriptorOpts, MetricKey};
use vantage_fetch::{ResourceMap, ResourceState};

use crate::prom::{capacity_stat, PromResponse};
use crate::session::MetricSnapshot;

pub const NODES: &str = "nodes";
pub const PODS: &str = "pods";
pub const PVCS: &str = "pvcs";
pub const VMS: &str = "vms";
pub const INFRASTRUCTURE: &str = "infrastructure";
pub const MIGRATIONS: &str = "migrations";
pub const HOSTS: &str = "hosts";

/// The fixed resource map behind the cluster overview.
pub fn overview_resource_map() -> ResourceMap {
    ResourceMap::new()
        .with(NODES, model::NODE.list())
        .with(PODS, model::POD.list())
        .with(PVCS, model::PERSISTENT_VOLUME_CLAIM.list())
        .with(VMS, model::VIRTUAL_MACHINE.list())
        .with(
            INFRASTRUCTURE,
            model::INFRASTRUCTURE.descriptor(DescriptorOpts {
                name: Some("cluster".to_string()),
                is_list: Some(false),
                namespaced: Some(false),
                ..Default::default()
            }),
        )
        .with(MIGRATIONS, model::VM_INSTANCE_MIGRATION.list())
        .with(HOSTS, model::BAREMETAL_HOST.list())
}

/// Inventory counts; None means the binding has not loaded (or failed).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub nodes: Option<usize>,
    pub pods: Option<usize>,
    pub pvcs: Option<usize>,
    pub vms: Option<usize>,
    pub migrations: Option<usize>,
    pub hosts: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthSummary {
    pub api: Option<bool>,
    pub virt: Option<bool>,
    /// Raw ceph health status value (0 healthy, 1 warn, 2 error).
    pub ceph: Option<f64>,
    pub ceph_osd_up: Option<f64>,
    pub ceph_osd_down: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Capacity {
    pub memory_total_bytes: Option<f64>,
    pub network_total_bps: Option<f64>,
    pub network_used_bps: Option<f64>,
    pub storage_total_bytes: Option<f64>,
    pub storage_used_bytes: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Utilization {
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<f64>,
    pub storage_iorw: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OverviewModel {
    pub inventory: Inventory,
    pub health: HealthSummary,
    pub capacity: Capacity,
    pub utilization: Utilization,
    /// Infrastructure platform (e.g. "BareMetal"), from the singleton object.
    pub platform: Option<String>,
}

fn count(resources: &ResourceState, name: &str) -> Option<usize> {
    let binding = resources.get(name)?;
    if !binding.loaded {
        return None;
    }
    Some(resources.items(name).len())
}

fn query_of<'a>(metrics: &'a MetricSnapshot, key: MetricKey) -> Option<&'a PromResponse> {
    metrics.get(key).loaded().and_then(|v| v.as_query())
}

fn instant_stat(metrics: &MetricSnapshot, key: MetricKey) -> Option<f64> {
    query_of(metrics, key).and_then(capacity_stat)
}

/// Last sample of the first series of a range (matrix) result.
fn range_stat(metrics: &MetricSnapshot, key: MetricKey) -> Option<f64> {
    let resp = query_of(metrics, key)?;
    let sample = resp.data.result.first()?;
    // Some backends answer subqueries with an instant vector; accept both.
    if let Some(values) = sample.values.as_ref() {
        return values.last().and_then(|(_, v)| v.parse::<f64>().ok());
    }
    sample.value.as_ref().and_then(|(_, v)| v.parse::<f64>().ok())
}

fn health_of(metrics: &MetricSnapshot, key: MetricKey) -> Option<bool> {
    metrics.get(key).loaded().and_then(|v| v.as_health()).map(|h| h.is_ok())
}

impl OverviewModel {
    pub fn project(resources: &ResourceState, metrics: &MetricSnapshot) -> Self {
        let platform = resources
            .data(INFRASTRUCTURE)
            .and_then(|v| v.pointer("/status/platform"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Self {
            inventory: Inventory {
                nodes: count(resources, NODES),
                pods: count(resources, PODS),
                pvcs: count(resources, PVCS),
                vms: count(resources, VMS),
                migrations: count(resources, MIGRATIONS),
                hosts: count(resources, HOSTS),
            },
            health: HealthSummary {
                api: health_of(metrics, MetricKey::ApiHealth),
                virt: health_of(metrics, MetricKey::VirtHealth),
                ceph: instant_stat(metrics, MetricKey::CephHealth),
                ceph_osd_up: instant_stat(metrics, MetricKey::CephOsdUp),
                ceph_osd_down: instant_stat(metrics, MetricKey::CephOsdDown),
            },
            capacity: Capacity {
                memory_total_bytes: instant_stat(metrics, MetricKey::MemoryTotal),
                network_total_bps: instant_stat(metrics, MetricKey::NetworkTotal),
                network_used_bps: instant_stat(metrics, MetricKey::NetworkUsed),
                storage_total_bytes: instant_stat(metrics, MetricKey::StorageTotal),
                storage_used_bytes: instant_stat(metrics, MetricKey::StorageUsed),
            },
            utilization: Utilization {
                cpu_percent: range_stat(metrics, MetricKey::CpuUtilization),
                memory_bytes: range_stat(metrics, MetricKey::MemoryUtilization),
                storage_iorw: instant_stat(metrics, MetricKey::StorageIorw),
            },
            platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthResult;
    use crate::store::{MetricStore, MetricValue};
    use vantage_fetch::Binding;

    fn loaded_binding(data: serde_json::Value) -> Binding {
        Binding { required: false, loaded: true, data: Some(data), error: None }
    }

    fn list_of(n: usize) -> serde_json::Value {
        serde_json::json!({ "items": vec![serde_json::json!({}); n] })
    }

    fn vector(value: &str) -> MetricValue {
        MetricValue::Query(
            serde_json::from_value(serde_json::json!({
                "status": "success",
                "data": { "resultType": "vector", "result": [ { "metric": {}, "value": [1.0, value] } ] }
            }))
            .unwrap(),
        )
    }

    fn matrix(values: &[(f64, &str)]) -> MetricValue {
        let vals: Vec<_> = values.iter().map(|(t, v)| serde_json::json!([t, v])).collect();
        MetricValue::Query(
            serde_json::from_value(serde_json::json!({
                "status": "success",
                "data": { "resultType": "matrix", "result": [ { "metric": {}, "values": vals } ] }
            }))
            .unwrap(),
        )
    }

    #[test]
    fn counts_come_from_loaded_bindings_only() {
        let mut resources = ResourceState::default();
        resources.bindings.insert(NODES.into(), loaded_binding(list_of(3)));
        resources.bindings.insert(PODS.into(), Binding { required: false, loaded: false, data: None, error: Some("x".into()) });
        let model = OverviewModel::project(&resources, &MetricSnapshot::default());
        assert_eq!(model.inventory.nodes, Some(3));
        assert_eq!(model.inventory.pods, None);
        assert_eq!(model.inventory.vms, None);
    }

    #[test]
    fn metrics_fill_capacity_health_and_utilization() {
        let mut store = MetricStore::new();
        store.update(MetricKey::MemoryTotal, 1, vector("1024"));
        store.update(MetricKey::StorageTotal, 1, vector("2048"));
        store.update(MetricKey::CephHealth, 1, vector("0"));
        store.update(MetricKey::CpuUtilization, 1, matrix(&[(1.0, "10.5"), (2.0, "12.5")]));
        store.update(
            MetricKey::ApiHealth,
            1,
            MetricValue::Health(HealthResult { response: "ok".into() }),
        );
        let metrics = MetricSnapshot { epoch: 5, store };
        let model = OverviewModel::project(&ResourceState::default(), &metrics);
        assert_eq!(model.capacity.memory_total_bytes, Some(1024.0));
        assert_eq!(model.capacity.storage_total_bytes, Some(2048.0));
        assert_eq!(model.health.api, Some(true));
        assert_eq!(model.health.ceph, Some(0.0));
        // Range result projects its most recent sample.
        assert_eq!(model.utilization.cpu_percent, Some(12.5));
        assert_eq!(model.utilization.storage_iorw, None);
    }

    #[test]
    fn platform_comes_from_the_infrastructure_singleton() {
        let mut resources = ResourceState::default();
        resources.bindings.insert(
            INFRASTRUCTURE.into(),
            loaded_binding(serde_json::json!({ "status": { "platform": "BareMetal" } })),
        );
        let model = OverviewModel::project(&resources, &MetricSnapshot::default());
        assert_eq!(model.platform.as_deref(), Some("BareMetal"));
    }

    #[test]
    fn overview_map_marks_expected_bindings() {
        let map = overview_resource_map();
        assert_eq!(map.len(), 7);
        let infra = map
            .iter()
            .find(|(name, _)| name == INFRASTRUCTURE)
            .map(|(_, req)| req.descriptor.clone())
            .unwrap();
        assert!(!infra.is_list);
        assert!(!infra.namespaced);
        assert_eq!(infra.name.as_deref(), Some("cluster"));
    }
}
