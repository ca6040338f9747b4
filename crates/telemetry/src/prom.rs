//! Prometheus HTTP API client and response envelope.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decoded `/api/v1/query` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromResponse {
    pub status: String,
    pub data: PromData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<PromSample>,
}

/// One series of an instant or range result. Instant vectors carry `value`,
/// range vectors carry `values`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<(f64, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<(f64, String)>>,
}

impl PromResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// First instant-vector sample as a number, None when the result is empty or
/// not numeric. Used both by the capacity probe and the overview projection.
pub fn capacity_stat(resp: &PromResponse) -> Option<f64> {
    resp.data
        .result
        .first()
        .and_then(|s| s.value.as_ref())
        .and_then(|(_, v)| v.parse::<f64>().ok())
}

/// Seam over the metrics backend: expression query plus the metric-name
/// catalog used by the storage capability probe.
#[async_trait::async_trait]
pub trait PromClient: Send + Sync + 'static {
    async fn query(&self, expr: &str) -> Result<PromResponse>;
    async fn metric_names(&self) -> Result<Vec<String>>;
}

/// reqwest-backed client against a Prometheus base URL.
pub struct HttpPromClient {
    base: String,
    client: reqwest::Client,
}

impl HttpPromClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building prometheus http client")?;
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Ok(Self { base, client })
    }
}

#[derive(Debug, Deserialize)]
struct LabelValuesResponse {
    status: String,
    #[serde(default)]
    data: Vec<String>,
}

#[async_trait::async_trait]
impl PromClient for HttpPromClient {
    async fn query(&self, expr: &str) -> Result<PromResponse> {
        let url = format!("{}/api/v1/query", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
            .with_context(|| format!("querying {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("prometheus query returned HTTP {}", resp.status()));
        }
        let decoded: PromResponse = resp.json().await.context("decoding prometheus envelope")?;
        if !decoded.is_success() {
            return Err(anyhow!("prometheus query status: {}", decoded.status));
        }
        debug!(series = decoded.data.result.len(), "prometheus query ok");
        Ok(decoded)
    }

    async fn metric_names(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/label/__name__/values", self.base);
        let resp = self.client.get(&url).send().await.with_context(|| format!("querying {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("metric catalog returned HTTP {}", resp.status()));
        }
        let decoded: LabelValuesResponse = resp.json().await.context("decoding label values")?;
        if decoded.status != "success" {
            return Err(anyhow!("metric catalog status: {}", decoded.status));
        }
        Ok(decoded.data)
    }
}
