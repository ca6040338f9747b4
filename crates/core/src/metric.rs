//! Typed dashboard result slots.
//!
//! A closed enumeration instead of a string-keyed bag: every overview slot a
//! periodic query can fill is named here, so a session's store can be
//! iterated exhaustively and a missing entry is a compile error rather than a
//! typo at runtime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricKey {
    WorkloadCpu,
    WorkloadMemory,
    WorkloadStorage,
    WorkloadNetwork,
    InfraCpu,
    InfraMemory,
    InfraStorage,
    InfraNetwork,
    ClusterVersion,
    MemoryTotal,
    NetworkTotal,
    NetworkUsed,
    CpuUtilization,
    MemoryUtilization,
    StorageTotal,
    StorageUsed,
    StorageIorw,
    CephHealth,
    CephOsdUp,
    CephOsdDown,
    ApiHealth,
    VirtHealth,
    Alerts,
}

impl MetricKey {
    /// Every slot, stable order (serialization and iteration rely on it).
    pub const ALL: &'static [MetricKey] = &[
        MetricKey::WorkloadCpu,
        MetricKey::WorkloadMemory,
        MetricKey::WorkloadStorage,
        MetricKey::WorkloadNetwork,
        MetricKey::InfraCpu,
        MetricKey::InfraMemory,
        MetricKey::InfraStorage,
        MetricKey::InfraNetwork,
        MetricKey::ClusterVersion,
        MetricKey::MemoryTotal,
        MetricKey::NetworkTotal,
        MetricKey::NetworkUsed,
        MetricKey::CpuUtilization,
        MetricKey::MemoryUtilization,
        MetricKey::StorageTotal,
        MetricKey::StorageUsed,
        MetricKey::StorageIorw,
        MetricKey::CephHealth,
        MetricKey::CephOsdUp,
        MetricKey::CephOsdDown,
        MetricKey::ApiHealth,
        MetricKey::VirtHealth,
        MetricKey::Alerts,
    ];

    /// Slots filled from the Prometheus backend (everything except the raw
    /// health probes and Alertmanager).
    pub fn is_prometheus(&self) -> bool {
        !matches!(self, MetricKey::ApiHealth | MetricKey::VirtHealth | MetricKey::Alerts)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::WorkloadCpu => "workload_cpu",
            MetricKey::WorkloadMemory => "workload_memory",
            MetricKey::WorkloadStorage => "workload_storage",
            MetricKey::WorkloadNetwork => "workload_network",
            MetricKey::InfraCpu => "infra_cpu",
            MetricKey::InfraMemory => "infra_memory",
            MetricKey::InfraStorage => "infra_storage",
            MetricKey::InfraNetwork => "infra_network",
            MetricKey::ClusterVersion => "cluster_version",
            MetricKey::MemoryTotal => "memory_total",
            MetricKey::NetworkTotal => "network_total",
            MetricKey::NetworkUsed => "network_used",
            MetricKey::CpuUtilization => "cpu_utilization",
            MetricKey::MemoryUtilization => "memory_utilization",
            MetricKey::StorageTotal => "storage_total",
            MetricKey::StorageUsed => "storage_used",
            MetricKey::StorageIorw => "storage_iorw",
            MetricKey::CephHealth => "ceph_health",
            MetricKey::CephOsdUp => "ceph_osd_up",
            MetricKey::CephOsdDown => "ceph_osd_down",
            MetricKey::ApiHealth => "api_health",
            MetricKey::VirtHealth => "virt_health",
            MetricKey::Alerts => "alerts",
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-side view of a result slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MetricState<T> {
    /// No successful completion yet (the "not yet loaded" sentinel).
    NotLoaded,
    Loaded(T),
}

impl<T> MetricState<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            MetricState::Loaded(v) => Some(v),
            MetricState::NotLoaded => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, MetricState::Loaded(_))
    }
}
