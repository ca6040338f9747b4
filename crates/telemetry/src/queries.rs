//! The fixed overview query set.
//!
//! Expressions carried over from the console dashboard; the storage pair is
//! resolved at session start by the ceph capability probe (see
//! [`crate::storage`]).

use vantage_core::MetricKey;

pub const CONSUMERS_CPU_QUERY: &str = "sort(topk(5, pod_name:container_cpu_usage:sum))";
pub const CONSUMERS_MEMORY_QUERY: &str = "sort(topk(5, pod_name:container_memory_usage_bytes:sum))";
pub const CONSUMERS_STORAGE_QUERY: &str = "sort(topk(5, avg by (pod_name)(irate(container_fs_io_time_seconds_total{container_name=\"POD\", pod_name!=\"\"}[1m]))))";
pub const CONSUMERS_NETWORK_QUERY: &str = "sort(topk(5, sum by (pod_name)(irate(container_network_receive_bytes_total{container_name=\"POD\", pod_name!=\"\"}[1m]) + irate(container_network_transmit_bytes_total{container_name=\"POD\", pod_name!=\"\"}[1m]))))";

pub const NODE_CONSUMERS_CPU_QUERY: &str = "sort(topk(5, node:node_cpu_utilisation:avg1m))";
pub const NODE_CONSUMERS_MEMORY_QUERY: &str = "sort(topk(5, node:node_memory_bytes_total:sum - node:node_memory_bytes_available:sum))";
pub const NODE_CONSUMERS_STORAGE_QUERY: &str = "sort(topk(5, node:node_disk_utilisation:avg_irate{cluster=\"\"}))";
pub const NODE_CONSUMERS_NETWORK_QUERY: &str = "sort(topk(5, node:node_net_utilisation:sum_irate{cluster=\"\"}))";

pub const CLUSTER_VERSION_QUERY: &str = "openshift_build_info{job=\"apiserver\"}";

pub const CAPACITY_MEMORY_TOTAL_QUERY: &str = "sum(kube_node_status_capacity_memory_bytes)";
pub const CAPACITY_NETWORK_TOTAL_QUERY: &str = "sum(avg by(instance)(node_network_speed_bytes))";
pub const CAPACITY_NETWORK_USED_QUERY: &str = "sum(node:node_net_utilisation:sum_irate)";

pub const UTILIZATION_CPU_USED_QUERY: &str =
    "((sum(node:node_cpu_utilisation:avg1m) / count(node:node_cpu_utilisation:avg1m)) * 100)[60m:5m]";
pub const UTILIZATION_MEMORY_USED_QUERY: &str =
    "(sum(kube_node_status_capacity_memory_bytes) - sum(kube_node_status_allocatable_memory_bytes))[60m:5m]";

// Ceph / distributed block storage.
pub const CEPH_STATUS_QUERY: &str = "ceph_health_status";
pub const CEPH_OSD_UP_QUERY: &str = "sum(ceph_osd_up)";
pub const CEPH_OSD_DOWN_QUERY: &str = "count(ceph_osd_up == 0.0) OR vector(0)";

/// Presence of this metric in the catalog marks a ceph-backed cluster.
pub const CAPACITY_STORAGE_TOTAL_BASE_CEPH_METRIC: &str = "ceph_cluster_total_bytes";
pub const CAPACITY_STORAGE_TOTAL_QUERY: &str = "ceph_cluster_total_bytes";
pub const CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY: &str =
    "sum(kube_persistentvolumeclaim_resource_requests_storage_bytes)";
pub const UTILIZATION_STORAGE_USED_QUERY: &str = "ceph_cluster_total_used_bytes";
pub const UTILIZATION_STORAGE_USED_DEFAULT_QUERY: &str = "sum(kubelet_volume_stats_used_bytes)";
pub const UTILIZATION_STORAGE_IORW_QUERY: &str =
    "(sum(rate(ceph_pool_wr_bytes[1m]) + rate(ceph_pool_rd_bytes[1m])))";

/// Queries scheduled unconditionally when a Prometheus backend is configured.
/// The storage total/used/iorw slots are intentionally absent: the probe
/// commits those per session.
pub const OVERVIEW_QUERIES: &[(MetricKey, &str)] = &[
    (MetricKey::WorkloadCpu, CONSUMERS_CPU_QUERY),
    (MetricKey::WorkloadMemory, CONSUMERS_MEMORY_QUERY),
    (MetricKey::WorkloadStorage, CONSUMERS_STORAGE_QUERY),
    (MetricKey::WorkloadNetwork, CONSUMERS_NETWORK_QUERY),
    (MetricKey::InfraCpu, NODE_CONSUMERS_CPU_QUERY),
    (MetricKey::InfraMemory, NODE_CONSUMERS_MEMORY_QUERY),
    (MetricKey::InfraStorage, NODE_CONSUMERS_STORAGE_QUERY),
    (MetricKey::InfraNetwork, NODE_CONSUMERS_NETWORK_QUERY),
    (MetricKey::ClusterVersion, CLUSTER_VERSION_QUERY),
    (MetricKey::MemoryTotal, CAPACITY_MEMORY_TOTAL_QUERY),
    (MetricKey::NetworkTotal, CAPACITY_NETWORK_TOTAL_QUERY),
    (MetricKey::NetworkUsed, CAPACITY_NETWORK_USED_QUERY),
    (MetricKey::CpuUtilization, UTILIZATION_CPU_USED_QUERY),
    (MetricKey::MemoryUtilization, UTILIZATION_MEMORY_USED_QUERY),
    (MetricKey::CephHealth, CEPH_STATUS_QUERY),
    (MetricKey::CephOsdUp, CEPH_OSD_UP_QUERY),
    (MetricKey::CephOsdDown, CEPH_OSD_DOWN_QUERY),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_set_covers_all_unconditional_prometheus_keys() {
        for key in MetricKey::ALL {
            let scheduled = OVERVIEW_QUERIES.iter().any(|(k, _)| k == key);
            let probe_owned = matches!(
                key,
                MetricKey::StorageTotal | MetricKey::StorageUsed | MetricKey::StorageIorw
            );
            if key.is_prometheus() {
                assert!(
                    scheduled ^ probe_owned,
                    "{key} must be either fixed or probe-owned"
                );
            } else {
                assert!(!scheduled, "{key} is not a prometheus slot");
            }
        }
    }
}
