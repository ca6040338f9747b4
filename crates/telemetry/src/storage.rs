//! One-shot storage capability probe.
//!
//! Before the recurring storage queries are scheduled, the session asks the
//! metric catalog whether the ceph base metric exists, and if so whether a
//! capacity query against it yields usable data. Only then does it commit to
//! the specialized query pair; in every other case (metric absent, empty
//! capacity, any probe error) the documented defaults win. The decision is
//! made exactly once per session and the caller schedules the recurring
//! queries after it resolves, on success and failure paths alike.

use anyhow::Result;
use tracing::{debug, info};

use crate::prom::{capacity_stat, PromClient};
use crate::queries::{
    CAPACITY_STORAGE_TOTAL_BASE_CEPH_METRIC, CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY,
    CAPACITY_STORAGE_TOTAL_QUERY, UTILIZATION_STORAGE_IORW_QUERY,
    UTILIZATION_STORAGE_USED_DEFAULT_QUERY, UTILIZATION_STORAGE_USED_QUERY,
};

/// The committed recurring storage query shape for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageQueries {
    pub total: &'static str,
    pub used: &'static str,
    /// IO read/write throughput; only meaningful on ceph-backed clusters.
    pub iorw: Option<&'static str>,
    pub specialized: bool,
}

impl StorageQueries {
    pub fn default_pair() -> Self {
        Self {
            total: CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY,
            used: UTILIZATION_STORAGE_USED_DEFAULT_QUERY,
            iorw: None,
            specialized: false,
        }
    }

    pub fn ceph_pair() -> Self {
        Self {
            total: CAPACITY_STORAGE_TOTAL_QUERY,
            used: UTILIZATION_STORAGE_USED_QUERY,
            iorw: Some(UTILIZATION_STORAGE_IORW_QUERY),
            specialized: true,
        }
    }
}

async fn ceph_backed(prom: &dyn PromClient) -> Result<bool> {
    let names = prom.metric_names().await?;
    if !names.iter().any(|n| n == CAPACITY_STORAGE_TOTAL_BASE_CEPH_METRIC) {
        return Ok(false);
    }
    let capacity = prom.query(CAPACITY_STORAGE_TOTAL_QUERY).await?;
    Ok(capacity_stat(&capacity).is_some())
}

/// Resolve the storage query pair for a session. Infallible by contract: any
/// probe failure degrades to the default pair.
pub async fn resolve_storage_queries(prom: &dyn PromClient) -> StorageQueries {
    match ceph_backed(prom).await {
        Ok(true) => {
            info!("ceph metrics detected; using specialized storage queries");
            StorageQueries::ceph_pair()
        }
        Ok(false) => {
            debug!("no usable ceph metrics; using default storage queries");
            StorageQueries::default_pair()
        }
        Err(e) => {
            debug!(error = %e, "storage probe failed; using default storage queries");
            StorageQueries::default_pair()
        }
    }
}
