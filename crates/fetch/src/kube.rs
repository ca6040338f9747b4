//! Live-cluster fetcher over dynamic kube APIs.

use anyhow::{anyhow, Context, Result};
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use tracing::debug;
use vantage_core::ResourceDescriptor;

use crate::ResourceFetcher;

/// Fetches snapshots through a shared kube client. Descriptors carry their
/// plural and scope, so no discovery round-trip is needed per fetch.
#[derive(Clone)]
pub struct KubeFetcher {
    client: Client,
}

impl KubeFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self { client })
    }

    fn api_for(&self, d: &ResourceDescriptor) -> Api<DynamicObject> {
        let ar = ApiResource {
            group: d.group.clone(),
            version: d.version.clone(),
            api_version: if d.group.is_empty() {
                d.version.clone()
            } else {
                format!("{}/{}", d.group, d.version)
            },
            kind: d.kind.clone(),
            plural: d.plural.clone(),
        };
        if d.namespaced {
            match d.namespace.as_deref() {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
                None => Api::all_with(self.client.clone(), &ar),
            }
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for KubeFetcher {
    async fn fetch(&self, d: &ResourceDescriptor) -> Result<serde_json::Value> {
        let api = self.api_for(d);
        if d.is_list {
            let mut lp = ListParams::default();
            if let Some(sel) = d.selector_string() {
                lp = lp.labels(&sel);
            }
            let list = api.list(&lp).await.with_context(|| format!("listing {}", d.gvk_key()))?;
            debug!(gvk = %d.gvk_key(), items = list.items.len(), "list fetched");
            Ok(serde_json::to_value(&list)?)
        } else {
            let name = d
                .name
                .as_deref()
                .ok_or_else(|| anyhow!("singleton descriptor for {} missing name", d.gvk_key()))?;
            let obj = api.get(name).await.with_context(|| format!("getting {} {}", d.gvk_key(), name))?;
            Ok(serde_json::to_value(&obj)?)
        }
    }
}
