//! Latest-result store keyed by [`MetricKey`].

use metrics::counter;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vantage_core::{MetricKey, MetricState};

use crate::health::HealthResult;
use crate::prom::PromResponse;

/// Decoded result of one periodic query completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MetricValue {
    Query(PromResponse),
    Health(HealthResult),
    Alerts(serde_json::Value),
}

impl MetricValue {
    pub fn as_query(&self) -> Option<&PromResponse> {
        match self {
            MetricValue::Query(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_health(&self) -> Option<&HealthResult> {
        match self {
            MetricValue::Health(h) => Some(h),
            _ => None,
        }
    }
}

/// One successful completion flowing from a poll into the store.
#[derive(Debug, Clone)]
pub struct Completion {
    pub key: MetricKey,
    pub seq: u64,
    pub value: MetricValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Slot {
    seq: u64,
    value: MetricValue,
}

/// Per-session mapping of metric key -> latest result. Readers get the
/// not-loaded sentinel until the first completion lands. Writes carry the
/// issuing tick's sequence number; a completion older than the stored one is
/// rejected, so overlapping in-flight requests can never roll a slot back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricStore {
    slots: FxHashMap<MetricKey, Slot>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MetricKey) -> MetricState<&MetricValue> {
        match self.slots.get(&key) {
            Some(slot) => MetricState::Loaded(&slot.value),
            None => MetricState::NotLoaded,
        }
    }

    pub fn is_loaded(&self, key: MetricKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Store `value` for `key` unless a newer completion already landed.
    /// Returns whether the write was accepted.
    pub fn update(&mut self, key: MetricKey, seq: u64, value: MetricValue) -> bool {
        match self.slots.get(&key) {
            Some(existing) if existing.seq >= seq => {
                debug!(key = %key, seq, stored = existing.seq, "stale completion rejected");
                counter!("metric_store_stale_writes_total", 1u64, "key" => key.as_str());
                false
            }
            _ => {
                self.slots.insert(key, Slot { seq, value });
                true
            }
        }
    }

    pub fn apply(&mut self, c: Completion) -> bool {
        self.update(c.key, c.seq, c.value)
    }

    /// Number of slots with at least one result.
    pub fn loaded_count(&self) -> usize {
        self.slots.len()
    }
}
