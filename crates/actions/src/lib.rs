//! Imperative cluster actions behind a seam trait, plus the VM creation
//! wizard built on top of them.
//!
//! [`ActionContext`] is the create/get/patch/delete surface handed to modal
//! workflows; [`KubeActions`] implements it over dynamic kube APIs and
//! [`MockActions`] records calls for tests. The wizard lives in [`wizard`].

#![forbid(unsafe_code)]

pub mod wizard;

use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use serde_json::Value;
use tracing::{debug, info};
use vantage_core::{ResourceDescriptor, VantageError, VantageResult};

pub use wizard::{
    wizard_resource_map, DiskSpec, NicSpec, VmSpec, WizardError, WizardLauncher, WizardSession,
};

/// Create/get/patch/delete against the cluster, parameterized by descriptor.
///
/// `create` takes its payload by `&mut` on purpose: the object name is
/// normalized to lowercase in place before submission, so the caller observes
/// the name that was actually sent.
#[async_trait::async_trait]
pub trait ActionContext: Send + Sync {
    async fn create(&self, descriptor: &ResourceDescriptor, payload: &mut Value) -> VantageResult<Value>;
    async fn get(&self, descriptor: &ResourceDescriptor, name: &str) -> VantageResult<Value>;
    async fn patch(&self, descriptor: &ResourceDescriptor, name: &str, patch: Value) -> VantageResult<Value>;
    async fn delete(&self, descriptor: &ResourceDescriptor, name: &str) -> VantageResult<()>;
}

/// Lowercase `metadata.name` in place. Servers reject uppercase DNS-1123
/// names, so every create path runs this before submitting.
pub fn lowercase_name(payload: &mut Value) {
    if let Some(name) = payload.pointer_mut("/metadata/name") {
        if let Some(s) = name.as_str() {
            if s.chars().any(|c| c.is_ascii_uppercase()) {
                *name = Value::String(s.to_ascii_lowercase());
            }
        }
    }
}

fn name_of(payload: &Value) -> Option<&str> {
    payload.pointer("/metadata/name").and_then(|v| v.as_str())
}

fn from_kube(e: kube::Error, what: &str) -> VantageError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 || ae.reason == "AlreadyExists" => {
            VantageError::Conflict(format!("{}: {}", what, ae.message))
        }
        kube::Error::Api(ae) if ae.code == 404 => {
            VantageError::NotFound(format!("{}: {}", what, ae.message))
        }
        kube::Error::Api(ae) => VantageError::Http(format!("{}: {} (HTTP {})", what, ae.message, ae.code)),
        other => VantageError::Internal(format!("{}: {}", what, other)),
    }
}

/// Live implementation over a shared kube client and dynamic objects.
#[derive(Clone)]
pub struct KubeActions {
    client: Client,
}

impl KubeActions {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
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
impl ActionContext for KubeActions {
    async fn create(&self, d: &ResourceDescriptor, payload: &mut Value) -> VantageResult<Value> {
        lowercase_name(payload);
        let mut body = payload.clone();
        // Dynamic objects need their type meta; fill it from the descriptor
        // when the payload omits it.
        if let Some(map) = body.as_object_mut() {
            if !map.contains_key("apiVersion") {
                let api_version = if d.group.is_empty() {
                    d.version.clone()
                } else {
                    format!("{}/{}", d.group, d.version)
                };
                map.insert("apiVersion".to_string(), Value::String(api_version));
            }
            if !map.contains_key("kind") {
                map.insert("kind".to_string(), Value::String(d.kind.clone()));
            }
        }
        let obj: DynamicObject = serde_json::from_value(body)
            .map_err(|e| VantageError::Validation(format!("create payload for {}: {}", d.gvk_key(), e)))?;
        let api = self.api_for(d);
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| from_kube(e, &format!("creating {}", d.gvk_key())))?;
        info!(gvk = %d.gvk_key(), name = %name_of(payload).unwrap_or("<unnamed>"), "object created");
        serde_json::to_value(&created).map_err(|e| VantageError::Internal(e.to_string()))
    }

    async fn get(&self, d: &ResourceDescriptor, name: &str) -> VantageResult<Value> {
        let api = self.api_for(d);
        let obj = api
            .get(name)
            .await
            .map_err(|e| from_kube(e, &format!("getting {} {}", d.gvk_key(), name)))?;
        serde_json::to_value(&obj).map_err(|e| VantageError::Internal(e.to_string()))
    }

    async fn patch(&self, d: &ResourceDescriptor, name: &str, patch: Value) -> VantageResult<Value> {
        let api = self.api_for(d);
        let pp = PatchParams::default();
        let obj = api
            .patch(name, &pp, &Patch::Merge(&patch))
            .await
            .map_err(|e| from_kube(e, &format!("patching {} {}", d.gvk_key(), name)))?;
        debug!(gvk = %d.gvk_key(), name = %name, "object patched");
        serde_json::to_value(&obj).map_err(|e| VantageError::Internal(e.to_string()))
    }

    async fn delete(&self, d: &ResourceDescriptor, name: &str) -> VantageResult<()> {
        let api = self.api_for(d);
        let _ = api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| from_kube(e, &format!("deleting {} {}", d.gvk_key(), name)))?;
        info!(gvk = %d.gvk_key(), name = %name, "object deleted");
        Ok(())
    }
}

/// Recording double for wizard and CLI tests. Scripted conflicts let tests
/// drive the server-side already-exists path without a cluster.
#[derive(Default)]
pub struct MockActions {
    calls: std::sync::Mutex<Vec<ActionCall>>,
    conflict_names: std::sync::Mutex<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionCall {
    Create { gvk: String, name: String },
    Get { gvk: String, name: String },
    Patch { gvk: String, name: String },
    Delete { gvk: String, name: String },
}

impl MockActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent creates for `name` fail with Conflict.
    pub fn conflict_on(&self, name: impl Into<String>) {
        self.conflict_names.lock().unwrap().push(name.into());
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ActionCall::Create { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ActionContext for MockActions {
    async fn create(&self, d: &ResourceDescriptor, payload: &mut Value) -> VantageResult<Value> {
        lowercase_name(payload);
        let name = name_of(payload).unwrap_or("<unnamed>").to_string();
        if self.conflict_names.lock().unwrap().contains(&name) {
            return Err(VantageError::Conflict(format!("{} \"{}\" already exists", d.kind, name)));
        }
        self.calls.lock().unwrap().push(ActionCall::Create { gvk: d.gvk_key(), name });
        Ok(payload.clone())
    }

    async fn get(&self, d: &ResourceDescriptor, name: &str) -> VantageResult<Value> {
        self.calls.lock().unwrap().push(ActionCall::Get { gvk: d.gvk_key(), name: name.to_string() });
        Ok(serde_json::json!({ "metadata": { "name": name } }))
    }

    async fn patch(&self, d: &ResourceDescriptor, name: &str, patch: Value) -> VantageResult<Value> {
        self.calls.lock().unwrap().push(ActionCall::Patch { gvk: d.gvk_key(), name: name.to_string() });
        Ok(patch)
    }

    async fn delete(&self, d: &ResourceDescriptor, name: &str) -> VantageResult<()> {
        self.calls.lock().unwrap().push(ActionCall::Delete { gvk: d.gvk_key(), name: name.to_string() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_core::model;

    #[tokio::test]
    async fn create_lowercases_the_name_in_place() {
        let actions = MockActions::new();
        let mut payload = serde_json::json!({ "metadata": { "name": "TEST" }, "spec": { "volumes": [] } });
        let d = model::POD.descriptor(Default::default());
        actions.create(&d, &mut payload).await.unwrap();
        // The payload is passed by reference, so the caller sees the
        // normalized name directly on its own object.
        assert_eq!(payload.pointer("/metadata/name").and_then(|v| v.as_str()), Some("test"));
        assert_eq!(actions.created_names(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn create_without_a_name_is_passed_through() {
        let actions = MockActions::new();
        let mut payload = serde_json::json!({ "metadata": { "generateName": "vm-" } });
        let d = model::VIRTUAL_MACHINE.descriptor(Default::default());
        actions.create(&d, &mut payload).await.unwrap();
        assert!(payload.pointer("/metadata/name").is_none());
    }

    #[tokio::test]
    async fn scripted_conflict_surfaces_as_conflict_error() {
        let actions = MockActions::new();
        actions.conflict_on("example");
        let d = model::VIRTUAL_MACHINE.descriptor(Default::default());
        let mut payload = serde_json::json!({ "metadata": { "name": "EXAMPLE" } });
        let err = actions.create(&d, &mut payload).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(actions.calls().is_empty(), "a rejected create must not be recorded");
    }
}
