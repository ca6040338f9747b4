//! Resource fetch multiplexer: one poll loop per named binding, folded into a
//! single published snapshot.
//!
//! A consumer hands over a [`ResourceMap`] (logical name -> descriptor, with
//! an optional `required` flag) and gets back a [`MuxHandle`]. Every entry is
//! polled independently; updates are merged by one ingest task and published
//! through an `ArcSwap` snapshot plus an epoch watch channel. Entries marked
//! required gate [`StateReader::project`]: the projection runs only once all
//! of them have loaded at least once. A failing optional entry degrades to
//! "not available" and never blocks its siblings.

#![forbid(unsafe_code)]

pub mod kube;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vantage_core::ResourceDescriptor;

pub use kube::KubeFetcher;

/// Single snapshot fetch for a descriptor. The seam between the multiplexer
/// and the live cluster; tests drive the multiplexer through a fake.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> anyhow::Result<serde_json::Value>;
}

/// One entry of a resource map.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub descriptor: ResourceDescriptor,
    pub required: bool,
}

/// Ordered mapping of logical name -> resource request.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: Vec<(String, ResourceRequest)>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, descriptor: ResourceDescriptor) -> Self {
        self.entries.push((name.into(), ResourceRequest { descriptor, required: false }));
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, descriptor: ResourceDescriptor) -> Self {
        self.entries.push((name.into(), ResourceRequest { descriptor, required: true }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ResourceRequest)> {
        self.entries.iter()
    }
}

/// Runtime pairing of a logical name with its latest data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub required: bool,
    /// True once at least one fetch succeeded; stays true afterwards.
    pub loaded: bool,
    pub data: Option<serde_json::Value>,
    /// Last fetch error, cleared by the next success.
    pub error: Option<String>,
}

impl Binding {
    fn new(required: bool) -> Self {
        Self { required, loaded: false, data: None, error: None }
    }
}

/// Merged view over all bindings, published as an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceState {
    pub epoch: u64,
    pub bindings: BTreeMap<String, Binding>,
}

impl ResourceState {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn data(&self, name: &str) -> Option<&serde_json::Value> {
        self.bindings.get(name).and_then(|b| b.data.as_ref())
    }

    /// Items of a list binding, empty when unloaded or not a list.
    pub fn items(&self, name: &str) -> &[serde_json::Value] {
        self.data(name)
            .and_then(|v| v.get("items"))
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All required bindings have loaded at least once.
    pub fn ready(&self) -> bool {
        self.bindings.values().all(|b| !b.required || b.loaded)
    }

    /// First required binding that failed before ever loading.
    pub fn failed(&self) -> Option<&str> {
        self.bindings
            .values()
            .find(|b| b.required && !b.loaded && b.error.is_some())
            .and_then(|b| b.error.as_deref())
    }
}

/// Result of projecting a gated snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection<T> {
    /// Some required binding has not loaded yet.
    Loading,
    /// A required binding failed before loading; persistent for the consumer.
    Failed(String),
    Ready(T),
}

#[derive(Debug)]
struct BindingUpdate {
    name: String,
    outcome: Result<serde_json::Value, String>,
}

/// Read-side handle: current snapshot plus epoch subscription. Cloneable and
/// independent of the multiplexer lifetime (a cancelled multiplexer simply
/// stops publishing).
#[derive(Clone)]
pub struct StateReader {
    snap: Arc<ArcSwap<ResourceState>>,
    epoch_rx: watch::Receiver<u64>,
}

impl StateReader {
    pub fn current(&self) -> Arc<ResourceState> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    /// Apply `f` to the current snapshot, honoring required-binding gating.
    pub fn project<T>(&self, f: impl FnOnce(&ResourceState) -> T) -> Projection<T> {
        let state = self.current();
        if let Some(err) = state.failed() {
            return Projection::Failed(err.to_string());
        }
        if !state.ready() {
            return Projection::Loading;
        }
        Projection::Ready(f(&state))
    }

    /// Wait until `pred` holds for a published snapshot, or the deadline
    /// passes. Returns the snapshot that satisfied the predicate, if any.
    pub async fn wait_for(
        &self,
        deadline: Duration,
        mut pred: impl FnMut(&ResourceState) -> bool,
    ) -> Option<Arc<ResourceState>> {
        let mut rx = self.subscribe_epoch();
        let until = tokio::time::Instant::now() + deadline;
        loop {
            let cur = self.current();
            if pred(&cur) {
                return Some(cur);
            }
            let now = tokio::time::Instant::now();
            if now >= until {
                return None;
            }
            let rem = until.duration_since(now);
            if tokio::time::timeout(rem, rx.changed()).await.is_err() {
                return None;
            }
        }
    }
}

/// Owning handle for a spawned multiplexer. Dropping or cancelling aborts
/// every poll loop and the ingest task; no update lands afterwards.
pub struct MuxHandle {
    reader: StateReader,
    tasks: Vec<JoinHandle<()>>,
}

impl MuxHandle {
    pub fn reader(&self) -> StateReader {
        self.reader.clone()
    }

    pub fn current(&self) -> Arc<ResourceState> {
        self.reader.current()
    }

    /// Release every subscription. Consuming `self` makes a double release
    /// unrepresentable.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for MuxHandle {
    fn drop(&mut self) {
        for t in self.tasks.drain(..) {
            t.abort();
        }
    }
}

fn queue_cap() -> usize {
    std::env::var("VANTAGE_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(256)
}

/// Start one poll loop per map entry plus the ingest task.
///
/// Each loop fetches immediately, then on every `poll_interval` tick. A tick
/// failure records the error on the binding and is retried on the next tick;
/// the loop itself never terminates on error.
pub fn spawn(map: ResourceMap, fetcher: Arc<dyn ResourceFetcher>, poll_interval: Duration) -> MuxHandle {
    let cap = queue_cap();
    let (tx, mut rx) = mpsc::channel::<BindingUpdate>(cap);

    let mut initial = ResourceState::default();
    for (name, req) in map.iter() {
        initial.bindings.insert(name.clone(), Binding::new(req.required));
    }
    let snap = Arc::new(ArcSwap::from_pointee(initial));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);

    let mut tasks = Vec::with_capacity(map.len() + 1);
    for (name, req) in map.iter() {
        let name = name.clone();
        let descriptor = req.descriptor.clone();
        let fetcher = Arc::clone(&fetcher);
        let tx = tx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(binding = %name, gvk = %descriptor.gvk_key(), "poll loop started");
            loop {
                ticker.tick().await;
                let outcome = match fetcher.fetch(&descriptor).await {
                    Ok(v) => Ok(v),
                    Err(e) => {
                        debug!(binding = %name, error = %e, "fetch failed; will retry next tick");
                        counter!("fetch_errors_total", 1u64, "binding" => name.clone());
                        Err(e.to_string())
                    }
                };
                if tx.send(BindingUpdate { name: name.clone(), outcome }).await.is_err() {
                    break;
                }
            }
            debug!(binding = %name, "poll loop ended");
        }));
    }
    drop(tx);

    let snap_clone = Arc::clone(&snap);
    tasks.push(tokio::spawn(async move {
        let mut state = (**snap_clone.load()).clone();
        while let Some(update) = rx.recv().await {
            let Some(binding) = state.bindings.get_mut(&update.name) else {
                warn!(binding = %update.name, "update for unknown binding dropped");
                continue;
            };
            match update.outcome {
                Ok(v) => {
                    binding.loaded = true;
                    binding.data = Some(v);
                    binding.error = None;
                }
                Err(e) => {
                    binding.error = Some(e);
                }
            }
            state.epoch = state.epoch.saturating_add(1);
            let epoch = state.epoch;
            snap_clone.store(Arc::new(state.clone()));
            let _ = epoch_tx.send(epoch);
        }
        info!("multiplexer ingest loop stopped");
    }));

    MuxHandle { reader: StateReader { snap, epoch_rx }, tasks }
}
