//! Dashboard session: every periodic query one overview needs, wired to one
//! result store, for the lifetime of one view.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vantage_core::{MetricKey, MetricState};

use crate::health::{virt_health_path, HealthClient, API_HEALTH_PATH};
use crate::poll::{schedule, PollTicket};
use crate::prom::PromClient;
use crate::queries::OVERVIEW_QUERIES;
use crate::storage::resolve_storage_queries;
use crate::store::{Completion, MetricStore, MetricValue};

/// Session tunables; `from_env` reads the `VANTAGE_*` variables.
#[derive(Debug, Clone)]
pub struct SessionOpts {
    pub prometheus_url: Option<String>,
    pub alertmanager_url: Option<String>,
    pub query_interval: Duration,
    pub health_interval: Duration,
    /// Virtualization API group/version for the subresource health probe.
    pub virt_group: String,
    pub virt_version: String,
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            prometheus_url: None,
            alertmanager_url: None,
            query_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            virt_group: "kubevirt.io".to_string(),
            virt_version: "v1alpha3".to_string(),
        }
    }
}

impl SessionOpts {
    pub fn from_env() -> Self {
        let secs = |var: &str, default: u64| {
            std::env::var(var).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default)
        };
        Self {
            prometheus_url: std::env::var("VANTAGE_PROMETHEUS_URL").ok(),
            alertmanager_url: std::env::var("VANTAGE_ALERTMANAGER_URL").ok(),
            query_interval: Duration::from_secs(secs("VANTAGE_QUERY_SECS", 30)),
            health_interval: Duration::from_secs(secs("VANTAGE_HEALTH_SECS", 10)),
            ..Self::default()
        }
    }
}

/// Immutable published view of the session store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub epoch: u64,
    pub store: MetricStore,
}

impl MetricSnapshot {
    pub fn get(&self, key: MetricKey) -> MetricState<&MetricValue> {
        self.store.get(key)
    }
}

/// Cloneable read handle; outlives the session it came from.
#[derive(Clone)]
pub struct MetricReader {
    snap: Arc<ArcSwap<MetricSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl MetricReader {
    pub fn current(&self) -> Arc<MetricSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    /// Wait until `pred` holds for a published snapshot or the deadline hits.
    pub async fn wait_for(
        &self,
        deadline: Duration,
        mut pred: impl FnMut(&MetricSnapshot) -> bool,
    ) -> Option<Arc<MetricSnapshot>> {
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

/// Running dashboard session. Dropping it (or calling [`shutdown`]) cancels
/// every poll and the ingest loop; the reader's last snapshot stays readable
/// but never changes again.
///
/// [`shutdown`]: DashboardSession::shutdown
pub struct DashboardSession {
    reader: MetricReader,
    tickets: Arc<Mutex<Vec<PollTicket>>>,
    setup: Option<JoinHandle<()>>,
    ingest: Option<JoinHandle<()>>,
}

impl DashboardSession {
    /// Start all periodic queries. With no Prometheus client the session
    /// degrades to health polling only and every Prometheus-backed slot stays
    /// NotLoaded; with no health client those two slots stay NotLoaded.
    pub fn start(
        prom: Option<Arc<dyn PromClient>>,
        health: Option<Arc<dyn HealthClient>>,
        opts: SessionOpts,
    ) -> Self {
        let cap = std::env::var("VANTAGE_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(256);
        let (tx, mut rx) = mpsc::channel::<Completion>(cap);
        let snap = Arc::new(ArcSwap::from_pointee(MetricSnapshot::default()));
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        let tickets = Arc::new(Mutex::new(Vec::new()));

        {
            let mut held = tickets.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(health) = health {
                held.push(health_poll(
                    MetricKey::ApiHealth,
                    API_HEALTH_PATH.to_string(),
                    Arc::clone(&health),
                    opts.health_interval,
                    tx.clone(),
                ));
                held.push(health_poll(
                    MetricKey::VirtHealth,
                    virt_health_path(&opts.virt_group, &opts.virt_version),
                    health,
                    opts.health_interval,
                    tx.clone(),
                ));
            } else {
                warn!("no health client; skipping API health checks");
            }

            if let Some(prom) = prom.as_ref() {
                for (key, expr) in OVERVIEW_QUERIES {
                    held.push(prom_poll(*key, expr, Arc::clone(prom), opts.query_interval, tx.clone()));
                }
            } else {
                warn!("prometheus base url missing; scheduling health checks only");
            }

            if let Some(base) = opts.alertmanager_url.clone() {
                match alerts_poll(base, opts.query_interval, tx.clone()) {
                    Ok(ticket) => held.push(ticket),
                    Err(e) => warn!(error = %e, "alertmanager poll not started"),
                }
            }
        }

        // Two-phase storage setup: the probe must commit before the recurring
        // storage queries exist, so those tickets are registered late.
        let setup = prom.map(|prom| {
            let tickets = Arc::clone(&tickets);
            let tx = tx.clone();
            let interval = opts.query_interval;
            tokio::spawn(async move {
                let queries = resolve_storage_queries(prom.as_ref()).await;
                info!(specialized = queries.specialized, "storage queries committed");
                let mut held = tickets.lock().unwrap_or_else(|p| p.into_inner());
                held.push(prom_poll(MetricKey::StorageTotal, queries.total, Arc::clone(&prom), interval, tx.clone()));
                held.push(prom_poll(MetricKey::StorageUsed, queries.used, Arc::clone(&prom), interval, tx.clone()));
                if let Some(iorw) = queries.iorw {
                    held.push(prom_poll(MetricKey::StorageIorw, iorw, prom, interval, tx));
                }
            })
        });
        drop(tx);

        let snap_clone = Arc::clone(&snap);
        let ingest = tokio::spawn(async move {
            let mut store = MetricStore::new();
            let mut epoch = 0u64;
            while let Some(c) = rx.recv().await {
                let key = c.key;
                if store.apply(c) {
                    epoch += 1;
                    snap_clone.store(Arc::new(MetricSnapshot { epoch, store: store.clone() }));
                    let _ = epoch_tx.send(epoch);
                } else {
                    debug!(key = %key, "completion ignored by store");
                }
            }
            info!("session ingest loop stopped");
        });

        Self {
            reader: MetricReader { snap, epoch_rx },
            tickets,
            setup,
            ingest: Some(ingest),
        }
    }

    pub fn reader(&self) -> MetricReader {
        self.reader.clone()
    }

    /// Cancel every periodic query; no result handler runs afterwards.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        if let Some(setup) = self.setup.take() {
            setup.abort();
        }
        let drained: Vec<PollTicket> = {
            let mut held = self.tickets.lock().unwrap_or_else(|p| p.into_inner());
            held.drain(..).collect()
        };
        let count = drained.len();
        drop(drained);
        if let Some(ingest) = self.ingest.take() {
            ingest.abort();
        }
        info!(polls = count, "dashboard session shut down");
    }
}

fn prom_poll(
    key: MetricKey,
    expr: &'static str,
    prom: Arc<dyn PromClient>,
    interval: Duration,
    tx: mpsc::Sender<Completion>,
) -> PollTicket {
    schedule(
        key.as_str(),
        interval,
        move |seq| {
            let prom = Arc::clone(&prom);
            async move {
                let resp = prom.query(expr).await?;
                Ok(Completion { key, seq, value: MetricValue::Query(resp) })
            }
        },
        tx,
    )
}

fn health_poll(
    key: MetricKey,
    path: String,
    health: Arc<dyn HealthClient>,
    interval: Duration,
    tx: mpsc::Sender<Completion>,
) -> PollTicket {
    schedule(
        key.as_str(),
        interval,
        move |seq| {
            let health = Arc::clone(&health);
            let path = path.clone();
            async move {
                let result = health.health(&path).await?;
                Ok(Completion { key, seq, value: MetricValue::Health(result) })
            }
        },
        tx,
    )
}

fn alerts_poll(base: String, interval: Duration, tx: mpsc::Sender<Completion>) -> Result<PollTicket> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building alertmanager http client")?;
    let mut base = base;
    while base.ends_with('/') {
        base.pop();
    }
    Ok(schedule(
        MetricKey::Alerts.as_str(),
        interval,
        move |seq| {
            let client = client.clone();
            let url = format!("{}/api/v2/alerts", base);
            async move {
                let resp = client.get(&url).send().await.with_context(|| format!("fetching {}", url))?;
                if !resp.status().is_success() {
                    return Err(anyhow!("alertmanager returned HTTP {}", resp.status()));
                }
                let body: serde_json::Value = resp.json().await.context("decoding alerts")?;
                Ok(Completion { key: MetricKey::Alerts, seq, value: MetricValue::Alerts(body) })
            }
        },
        tx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthResult;
    use crate::prom::PromResponse;
    use crate::queries::{
        CAPACITY_STORAGE_TOTAL_BASE_CEPH_METRIC, CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY,
        CAPACITY_STORAGE_TOTAL_QUERY, UTILIZATION_STORAGE_IORW_QUERY,
        UTILIZATION_STORAGE_USED_DEFAULT_QUERY, UTILIZATION_STORAGE_USED_QUERY,
    };

    struct RecordingProm {
        ceph: bool,
        seen: Mutex<Vec<String>>,
    }

    impl RecordingProm {
        fn new(ceph: bool) -> Self {
            Self { ceph, seen: Mutex::new(Vec::new()) }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PromClient for RecordingProm {
        async fn query(&self, expr: &str) -> Result<PromResponse> {
            self.seen.lock().unwrap().push(expr.to_string());
            let result = if self.ceph || expr != CAPACITY_STORAGE_TOTAL_QUERY {
                serde_json::json!([{ "metric": {}, "value": [1.0, "42"] }])
            } else {
                serde_json::json!([])
            };
            Ok(serde_json::from_value(serde_json::json!({
                "status": "success",
                "data": { "resultType": "vector", "result": result }
            }))?)
        }

        async fn metric_names(&self) -> Result<Vec<String>> {
            if self.ceph {
                Ok(vec![CAPACITY_STORAGE_TOTAL_BASE_CEPH_METRIC.to_string()])
            } else {
                Ok(vec!["kube_pod_info".to_string()])
            }
        }
    }

    struct OkHealth;

    #[async_trait::async_trait]
    impl HealthClient for OkHealth {
        async fn health(&self, _path: &str) -> Result<HealthResult> {
            Ok(HealthResult { response: "ok".to_string() })
        }
    }

    fn fast_opts() -> SessionOpts {
        SessionOpts {
            query_interval: Duration::from_millis(20),
            health_interval: Duration::from_millis(20),
            ..SessionOpts::default()
        }
    }

    #[tokio::test]
    async fn fills_health_and_prometheus_slots() {
        let prom = Arc::new(RecordingProm::new(false));
        let session = DashboardSession::start(Some(prom), Some(Arc::new(OkHealth)), fast_opts());
        let reader = session.reader();
        let snap = reader
            .wait_for(Duration::from_secs(5), |s| {
                s.store.is_loaded(MetricKey::ApiHealth)
                    && s.store.is_loaded(MetricKey::VirtHealth)
                    && s.store.is_loaded(MetricKey::MemoryTotal)
                    && s.store.is_loaded(MetricKey::StorageTotal)
            })
            .await
            .expect("slots fill");
        let health = snap.get(MetricKey::ApiHealth);
        assert!(health.loaded().and_then(|v| v.as_health()).map(|h| h.is_ok()).unwrap_or(false));
        session.shutdown();
    }

    #[tokio::test]
    async fn non_ceph_cluster_polls_the_default_storage_pair() {
        let prom = Arc::new(RecordingProm::new(false));
        let session = DashboardSession::start(Some(prom.clone()), None, fast_opts());
        let reader = session.reader();
        reader
            .wait_for(Duration::from_secs(5), |s| {
                s.store.is_loaded(MetricKey::StorageTotal) && s.store.is_loaded(MetricKey::StorageUsed)
            })
            .await
            .expect("storage slots fill from defaults");
        session.shutdown();
        let seen = prom.seen();
        assert!(seen.iter().any(|q| q == CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY));
        assert!(seen.iter().any(|q| q == UTILIZATION_STORAGE_USED_DEFAULT_QUERY));
        assert!(!seen.iter().any(|q| q == UTILIZATION_STORAGE_USED_QUERY));
        assert!(!seen.iter().any(|q| q == UTILIZATION_STORAGE_IORW_QUERY));
    }

    #[tokio::test]
    async fn ceph_cluster_polls_the_specialized_pair_and_iorw() {
        let prom = Arc::new(RecordingProm::new(true));
        let session = DashboardSession::start(Some(prom.clone()), None, fast_opts());
        let reader = session.reader();
        reader
            .wait_for(Duration::from_secs(5), |s| s.store.is_loaded(MetricKey::StorageIorw))
            .await
            .expect("iorw slot fills on ceph clusters");
        session.shutdown();
        let seen = prom.seen();
        assert!(seen.iter().any(|q| q == UTILIZATION_STORAGE_USED_QUERY));
        assert!(seen.iter().any(|q| q == UTILIZATION_STORAGE_IORW_QUERY));
        assert!(!seen.iter().any(|q| q == CAPACITY_STORAGE_TOTAL_DEFAULT_QUERY));
        assert!(!seen.iter().any(|q| q == UTILIZATION_STORAGE_USED_DEFAULT_QUERY));
    }

    #[tokio::test]
    async fn missing_prometheus_leaves_prom_slots_not_loaded() {
        let session = DashboardSession::start(None, Some(Arc::new(OkHealth)), fast_opts());
        let reader = session.reader();
        let snap = reader
            .wait_for(Duration::from_secs(5), |s| {
                s.store.is_loaded(MetricKey::ApiHealth) && s.store.is_loaded(MetricKey::VirtHealth)
            })
            .await
            .expect("health still loads");
        for key in MetricKey::ALL.iter().filter(|k| k.is_prometheus()) {
            assert_eq!(snap.get(*key), MetricState::NotLoaded, "{key} must stay unloaded");
        }
        session.shutdown();
    }

    #[tokio::test]
    async fn shutdown_freezes_the_snapshot() {
        let prom = Arc::new(RecordingProm::new(false));
        let session = DashboardSession::start(Some(prom), Some(Arc::new(OkHealth)), fast_opts());
        let reader = session.reader();
        reader
            .wait_for(Duration::from_secs(5), |s| s.epoch >= 3)
            .await
            .expect("several completions land");
        session.shutdown();
        let frozen = reader.current().epoch;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reader.current().epoch, frozen, "no completion may land after shutdown");
    }
}
