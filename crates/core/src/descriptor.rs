use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Model;

/// Declarative description of what to fetch: group/version/kind plus scoping.
/// Identifies the target of a request, never the fetched data. Immutable once
/// built; construct via [`Model::descriptor`] or [`ResourceDescriptor::new`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    /// Namespace to scope the request to. Ignored for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name for singleton fetches (`is_list == false`).
    pub name: Option<String>,
    /// Equality-based label selector; sorted rendering keeps paths stable.
    pub label_selector: BTreeMap<String, String>,
    pub is_list: bool,
}

/// Optional overrides applied when deriving a descriptor from a [`Model`].
#[derive(Debug, Clone, Default)]
pub struct DescriptorOpts {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub match_labels: BTreeMap<String, String>,
    pub is_list: Option<bool>,
    pub namespaced: Option<bool>,
}

impl ResourceDescriptor {
    pub fn new(model: &Model, opts: DescriptorOpts) -> Self {
        Self {
            group: model.group.to_string(),
            version: model.version.to_string(),
            kind: model.kind.to_string(),
            plural: model.plural.to_string(),
            namespaced: opts.namespaced.unwrap_or(model.namespaced),
            namespace: opts.namespace,
            name: opts.name,
            label_selector: opts.match_labels,
            is_list: opts.is_list.unwrap_or(true),
        }
    }

    /// GVK key in the compact "v1/Kind" / "group/v1/Kind" form.
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Rendered equality selector ("a=1,b=2"), None when empty.
    pub fn selector_string(&self) -> Option<String> {
        if self.label_selector.is_empty() {
            return None;
        }
        let joined = self
            .label_selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        Some(joined)
    }

    /// Build the REST path for this descriptor against the API server base.
    ///
    /// Cluster-scoped descriptors never carry a namespace segment, even when
    /// a namespace was (mistakenly) supplied by the caller.
    pub fn request_path(&self) -> String {
        let mut path = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        if self.namespaced {
            if let Some(ns) = self.namespace.as_deref() {
                path.push_str("/namespaces/");
                path.push_str(ns);
            }
        }
        path.push('/');
        path.push_str(&self.plural);
        if !self.is_list {
            if let Some(name) = self.name.as_deref() {
                path.push('/');
                path.push_str(name);
            }
        }
        if let Some(sel) = self.selector_string() {
            path.push_str("?labelSelector=");
            path.push_str(&sel);
        }
        path
    }
}
