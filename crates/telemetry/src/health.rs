//! Plain-text health endpoints on the API server.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Decoded health probe body (the endpoints return raw text, usually "ok").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResult {
    pub response: String,
}

impl HealthResult {
    pub fn is_ok(&self) -> bool {
        self.response.trim() == "ok"
    }
}

/// Path of the API server health endpoint.
pub const API_HEALTH_PATH: &str = "/healthz";

/// Health endpoint served by the virtualization subresource aggregator.
pub fn virt_health_path(group: &str, version: &str) -> String {
    format!("/apis/subresources.{}/{}/healthz", group, version)
}

/// Seam over raw-path GETs against the API server.
#[async_trait::async_trait]
pub trait HealthClient: Send + Sync + 'static {
    async fn health(&self, path: &str) -> Result<HealthResult>;
}

/// Issues health probes through the kube client, so auth and base URL come
/// from the active kubeconfig.
#[derive(Clone)]
pub struct KubeHealth {
    client: kube::Client,
}

impl KubeHealth {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl HealthClient for KubeHealth {
    async fn health(&self, path: &str) -> Result<HealthResult> {
        let req = http::Request::get(path)
            .body(Vec::new())
            .with_context(|| format!("building health request for {}", path))?;
        let body = self
            .client
            .request_text(req)
            .await
            .with_context(|| format!("health probe {}", path))?;
        Ok(HealthResult { response: body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_body_is_healthy() {
        assert!(HealthResult { response: "ok".into() }.is_ok());
        assert!(HealthResult { response: "ok\n".into() }.is_ok());
        assert!(!HealthResult { response: "degraded".into() }.is_ok());
    }

    #[test]
    fn virt_path_targets_subresource_aggregator() {
        assert_eq!(
            virt_health_path("kubevirt.io", "v1alpha3"),
            "/apis/subresources.kubevirt.io/v1alpha3/healthz"
        );
    }
}
