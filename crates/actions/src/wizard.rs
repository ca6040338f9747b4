//! VM creation wizard: a modal workflow bound to a resource map and an
//! action context.
//!
//! The launcher mirrors the overview's data flow on a smaller map (the
//! entries a creation form needs to render its pickers), with the VM list as
//! the single required binding. Submission failures stay on the session: the
//! caller reads [`WizardSession::error`] and retries; nothing ever tears the
//! workflow down on its behalf.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};
use vantage_core::{model, DescriptorOpts, VantageError};
use vantage_fetch::{MuxHandle, Projection, ResourceFetcher, ResourceMap, StateReader};

use crate::ActionContext;

pub const NAMESPACES: &str = "namespaces";
pub const VIRTUAL_MACHINES: &str = "virtualMachines";
pub const USER_TEMPLATES: &str = "userTemplates";
pub const COMMON_TEMPLATES: &str = "commonTemplates";
pub const NETWORK_CONFIGS: &str = "networkConfigs";
pub const STORAGE_CLASSES: &str = "storageClasses";
pub const PERSISTENT_VOLUME_CLAIMS: &str = "persistentVolumeClaims";
pub const DATA_VOLUMES: &str = "dataVolumes";

pub const TEMPLATE_TYPE_LABEL: &str = "template.kubevirt.io/type";
pub const TEMPLATE_TYPE_VM: &str = "vm";
pub const TEMPLATE_TYPE_BASE: &str = "base";
/// Namespace the base (vendor-shipped) templates live in.
pub const COMMON_TEMPLATE_NAMESPACE: &str = "openshift";

fn labeled(value: &str) -> DescriptorOpts {
    let mut match_labels = std::collections::BTreeMap::new();
    match_labels.insert(TEMPLATE_TYPE_LABEL.to_string(), value.to_string());
    DescriptorOpts { match_labels, ..Default::default() }
}

/// The resource map behind the creation form. The VM list is required: the
/// form cannot validate a name without it. Everything else feeds pickers and
/// degrades to "not available".
pub fn wizard_resource_map(active_namespace: Option<&str>) -> ResourceMap {
    let ns = |opts: DescriptorOpts| DescriptorOpts {
        namespace: active_namespace.map(|s| s.to_string()),
        ..opts
    };
    ResourceMap::new()
        .with(NAMESPACES, model::NAMESPACE.list())
        .with_required(VIRTUAL_MACHINES, model::VIRTUAL_MACHINE.list())
        .with(USER_TEMPLATES, model::TEMPLATE.descriptor(ns(labeled(TEMPLATE_TYPE_VM))))
        .with(
            COMMON_TEMPLATES,
            model::TEMPLATE.descriptor(DescriptorOpts {
                namespace: Some(COMMON_TEMPLATE_NAMESPACE.to_string()),
                ..labeled(TEMPLATE_TYPE_BASE)
            }),
        )
        .with(NETWORK_CONFIGS, model::NETWORK_ATTACHMENT_DEFINITION.descriptor(ns(Default::default())))
        .with(STORAGE_CLASSES, model::STORAGE_CLASS.list())
        .with(PERSISTENT_VOLUME_CLAIMS, model::PERSISTENT_VOLUME_CLAIM.descriptor(ns(Default::default())))
        .with(DATA_VOLUMES, model::DATA_VOLUME.descriptor(ns(Default::default())))
}

/// Projection handed to the form: the active namespace object (when it
/// exists) and the merged user + common template list.
#[derive(Debug, Clone, Default)]
pub struct WizardProps {
    pub selected_namespace: Option<Value>,
    pub templates: Vec<Value>,
}

pub fn project_props(state: &vantage_fetch::ResourceState, active_namespace: Option<&str>) -> WizardProps {
    let selected_namespace = active_namespace.and_then(|active| {
        state
            .items(NAMESPACES)
            .iter()
            .find(|n| n.pointer("/metadata/name").and_then(|v| v.as_str()) == Some(active))
            .cloned()
    });
    let mut templates: Vec<Value> = state.items(USER_TEMPLATES).to_vec();
    templates.extend(state.items(COMMON_TEMPLATES).iter().cloned());
    WizardProps { selected_namespace, templates }
}

/// One disk request; emits one device entry plus its matching volume.
#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub name: String,
    /// Existing claim to attach. When None, a data volume is templated.
    pub pvc: Option<String>,
    pub size_gi: u64,
    pub storage_class: Option<String>,
}

impl DiskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), pvc: None, size_gi: 10, storage_class: None }
    }
}

/// One network interface request; emits one interface plus its network.
#[derive(Debug, Clone)]
pub struct NicSpec {
    pub name: String,
    /// NetworkAttachmentDefinition to bridge onto; None means pod network.
    pub network: Option<String>,
}

impl NicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), network: None }
    }
}

#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub namespace: String,
    pub description: Option<String>,
    pub cpu_cores: u32,
    pub memory_mi: u64,
    pub running: bool,
    pub disks: Vec<DiskSpec>,
    pub interfaces: Vec<NicSpec>,
}

impl VmSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            description: None,
            cpu_cores: 1,
            memory_mi: 512,
            running: false,
            disks: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_nic(mut self, nic: NicSpec) -> Self {
        self.interfaces.push(nic);
        self
    }
}

/// Build the VirtualMachine object for a spec. Attachments are exactly the
/// requested ones; nothing is implicitly added alongside them.
pub fn build_vm_object(spec: &VmSpec) -> Value {
    let vm = &model::VIRTUAL_MACHINE;
    let name = spec.name.to_ascii_lowercase();

    let mut disks = Vec::with_capacity(spec.disks.len());
    let mut volumes = Vec::with_capacity(spec.disks.len());
    let mut dv_templates = Vec::new();
    for d in &spec.disks {
        disks.push(json!({ "name": d.name, "disk": { "bus": "virtio" } }));
        match d.pvc.as_deref() {
            Some(claim) => {
                volumes.push(json!({ "name": d.name, "persistentVolumeClaim": { "claimName": claim } }));
            }
            None => {
                let dv_name = format!("{}-{}", name, d.name);
                volumes.push(json!({ "name": d.name, "dataVolume": { "name": dv_name } }));
                let mut dv_spec = json!({
                    "source": { "blank": {} },
                    "pvc": {
                        "accessModes": ["ReadWriteOnce"],
                        "resources": { "requests": { "storage": format!("{}Gi", d.size_gi) } }
                    }
                });
                if let Some(sc) = d.storage_class.as_deref() {
                    dv_spec["pvc"]["storageClassName"] = Value::String(sc.to_string());
                }
                dv_templates.push(json!({ "metadata": { "name": dv_name }, "spec": dv_spec }));
            }
        }
    }

    let mut interfaces = Vec::with_capacity(spec.interfaces.len());
    let mut networks = Vec::with_capacity(spec.interfaces.len());
    for n in &spec.interfaces {
        match n.network.as_deref() {
            Some(nad) => {
                interfaces.push(json!({ "name": n.name, "bridge": {} }));
                networks.push(json!({ "name": n.name, "multus": { "networkName": nad } }));
            }
            None => {
                interfaces.push(json!({ "name": n.name, "masquerade": {} }));
                networks.push(json!({ "name": n.name, "pod": {} }));
            }
        }
    }

    let mut metadata = json!({ "name": name, "namespace": spec.namespace });
    if let Some(desc) = spec.description.as_deref() {
        metadata["annotations"] = json!({ "description": desc });
    }

    let mut obj = json!({
        "apiVersion": format!("{}/{}", vm.group, vm.version),
        "kind": vm.kind,
        "metadata": metadata,
        "spec": {
            "running": spec.running,
            "template": {
                "spec": {
                    "domain": {
                        "cpu": { "cores": spec.cpu_cores },
                        "resources": { "requests": { "memory": format!("{}Mi", spec.memory_mi) } },
                        "devices": { "disks": disks, "interfaces": interfaces }
                    },
                    "networks": networks,
                    "volumes": volumes
                }
            }
        }
    });
    if !dv_templates.is_empty() {
        obj["spec"]["dataVolumeTemplates"] = Value::Array(dv_templates);
    }
    obj
}

/// Errors local to one wizard session. None of these navigate the caller
/// anywhere; they are stored on the session and cleared by the next success.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("virtual machine \"{0}\" already exists")]
    NameTaken(String),
    #[error("required resources are still loading")]
    NotReady,
    #[error("required resources failed to load: {0}")]
    Resources(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Action(#[from] VantageError),
}

/// Binds the wizard resource map to an action context.
pub struct WizardLauncher {
    actions: Arc<dyn ActionContext>,
    active_namespace: Option<String>,
}

impl WizardLauncher {
    pub fn new(actions: Arc<dyn ActionContext>, active_namespace: Option<String>) -> Self {
        Self { actions, active_namespace }
    }

    /// Spawn the backing multiplexer and open a session over it.
    pub fn launch(&self, fetcher: Arc<dyn ResourceFetcher>, poll_interval: Duration) -> WizardSession {
        let map = wizard_resource_map(self.active_namespace.as_deref());
        let mux = vantage_fetch::spawn(map, fetcher, poll_interval);
        info!(namespace = %self.active_namespace.as_deref().unwrap_or("<all>"), "vm wizard opened");
        WizardSession::new(mux, Arc::clone(&self.actions), self.active_namespace.clone())
    }
}

/// One open wizard. Dropping it releases the backing subscriptions.
pub struct WizardSession {
    mux: MuxHandle,
    actions: Arc<dyn ActionContext>,
    active_namespace: Option<String>,
    last_error: Option<WizardError>,
}

impl WizardSession {
    pub fn new(mux: MuxHandle, actions: Arc<dyn ActionContext>, active_namespace: Option<String>) -> Self {
        Self { mux, actions, active_namespace, last_error: None }
    }

    pub fn reader(&self) -> StateReader {
        self.mux.reader()
    }

    /// Current form props, gated on the required bindings.
    pub fn props(&self) -> Projection<WizardProps> {
        let ns = self.active_namespace.clone();
        self.mux.reader().project(move |s| project_props(s, ns.as_deref()))
    }

    /// Last submission failure, until the next successful submit.
    pub fn error(&self) -> Option<&WizardError> {
        self.last_error.as_ref()
    }

    /// Submit a creation request. On failure the session keeps its state and
    /// records the error; the caller stays where it is and may retry.
    pub async fn submit(&mut self, spec: &VmSpec) -> Result<Value, WizardError> {
        match self.try_submit(spec).await {
            Ok(created) => {
                self.last_error = None;
                Ok(created)
            }
            Err(e) => {
                warn!(name = %spec.name, error = %e, "vm creation rejected");
                // Errors are session-local; re-derive for the caller since
                // WizardError carries no Clone.
                self.last_error = Some(match &e {
                    WizardError::NameTaken(n) => WizardError::NameTaken(n.clone()),
                    WizardError::NotReady => WizardError::NotReady,
                    WizardError::Resources(m) => WizardError::Resources(m.clone()),
                    WizardError::Invalid(m) => WizardError::Invalid(m.clone()),
                    WizardError::Action(_) => WizardError::Invalid(e.to_string()),
                });
                Err(e)
            }
        }
    }

    async fn try_submit(&self, spec: &VmSpec) -> Result<Value, WizardError> {
        if spec.name.trim().is_empty() {
            return Err(WizardError::Invalid("name must not be empty".into()));
        }
        let name = spec.name.to_ascii_lowercase();

        // Validate against the loaded VM list before touching the server.
        let taken = match self.mux.reader().project(|s| {
            s.items(VIRTUAL_MACHINES).iter().any(|vm| {
                vm.pointer("/metadata/name").and_then(|v| v.as_str()) == Some(name.as_str())
                    && vm.pointer("/metadata/namespace").and_then(|v| v.as_str())
                        == Some(spec.namespace.as_str())
            })
        }) {
            Projection::Loading => return Err(WizardError::NotReady),
            Projection::Failed(msg) => return Err(WizardError::Resources(msg)),
            Projection::Ready(taken) => taken,
        };
        if taken {
            return Err(WizardError::NameTaken(name));
        }

        let descriptor = model::VIRTUAL_MACHINE.descriptor(DescriptorOpts {
            namespace: Some(spec.namespace.clone()),
            is_list: Some(false),
            ..Default::default()
        });
        let mut payload = build_vm_object(spec);
        match self.actions.create(&descriptor, &mut payload).await {
            Ok(created) => {
                info!(name = %name, namespace = %spec.namespace, "vm created");
                Ok(created)
            }
            // The list view can lag the server; a 409 is the same collision.
            Err(e) if e.is_conflict() => Err(WizardError::NameTaken(name)),
            Err(e) => Err(WizardError::Action(e)),
        }
    }

    pub fn close(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockActions;
    use vantage_core::ResourceDescriptor;

    /// Serves canned lists per kind; unknown kinds get empty lists.
    struct StaticFetcher {
        vms: Vec<Value>,
    }

    #[async_trait::async_trait]
    impl ResourceFetcher for StaticFetcher {
        async fn fetch(&self, d: &ResourceDescriptor) -> anyhow::Result<Value> {
            let items: Vec<Value> = match d.kind.as_str() {
                "VirtualMachine" => self.vms.clone(),
                "Namespace" => vec![
                    json!({ "metadata": { "name": "web" } }),
                    json!({ "metadata": { "name": "db" } }),
                ],
                "Template" => {
                    if d.namespace.as_deref() == Some(COMMON_TEMPLATE_NAMESPACE) {
                        vec![json!({ "metadata": { "name": "fedora-base" } })]
                    } else {
                        vec![json!({ "metadata": { "name": "my-template" } })]
                    }
                }
                _ => Vec::new(),
            };
            Ok(json!({ "kind": format!("{}List", d.kind), "items": items }))
        }
    }

    fn existing_vm(name: &str, namespace: &str) -> Value {
        json!({ "metadata": { "name": name, "namespace": namespace } })
    }

    async fn open_session(
        vms: Vec<Value>,
        actions: Arc<MockActions>,
        namespace: &str,
    ) -> WizardSession {
        let launcher = WizardLauncher::new(actions, Some(namespace.to_string()));
        let session = launcher.launch(
            Arc::new(StaticFetcher { vms }),
            Duration::from_millis(20),
        );
        session
            .reader()
            .wait_for(Duration::from_secs(5), |s| s.ready())
            .await
            .expect("required vm list loads");
        session
    }

    #[test]
    fn map_requires_only_the_vm_list() {
        let map = wizard_resource_map(Some("web"));
        assert_eq!(map.len(), 8);
        for (name, req) in map.iter() {
            assert_eq!(req.required, name == VIRTUAL_MACHINES, "binding {name}");
        }
        let user = map.iter().find(|(n, _)| n == USER_TEMPLATES).unwrap().1.descriptor.clone();
        assert_eq!(user.namespace.as_deref(), Some("web"));
        assert_eq!(user.label_selector.get(TEMPLATE_TYPE_LABEL).map(String::as_str), Some(TEMPLATE_TYPE_VM));
        let common = map.iter().find(|(n, _)| n == COMMON_TEMPLATES).unwrap().1.descriptor.clone();
        assert_eq!(common.namespace.as_deref(), Some(COMMON_TEMPLATE_NAMESPACE));
        assert_eq!(common.label_selector.get(TEMPLATE_TYPE_LABEL).map(String::as_str), Some(TEMPLATE_TYPE_BASE));
    }

    #[tokio::test]
    async fn props_merge_templates_and_pick_the_active_namespace() {
        let actions = Arc::new(MockActions::new());
        let session = open_session(Vec::new(), actions, "web").await;
        let state = session
            .reader()
            .wait_for(Duration::from_secs(5), |s| {
                s.get(USER_TEMPLATES).map(|b| b.loaded).unwrap_or(false)
                    && s.get(COMMON_TEMPLATES).map(|b| b.loaded).unwrap_or(false)
                    && s.get(NAMESPACES).map(|b| b.loaded).unwrap_or(false)
            })
            .await
            .expect("pickers load");
        let props = project_props(&state, Some("web"));
        assert_eq!(
            props.selected_namespace.and_then(|n| n.pointer("/metadata/name").cloned()),
            Some(json!("web"))
        );
        let names: Vec<_> = props
            .templates
            .iter()
            .filter_map(|t| t.pointer("/metadata/name").and_then(|v| v.as_str()).map(String::from))
            .collect();
        assert_eq!(names, vec!["my-template".to_string(), "fedora-base".to_string()]);
    }

    #[test]
    fn one_disk_one_nic_yields_exactly_those_attachments() {
        let spec = VmSpec::new("vm-example", "web")
            .with_disk(DiskSpec::new("testdisk"))
            .with_nic(NicSpec { name: "nic1".into(), network: Some("test-nad".into()) });
        let obj = build_vm_object(&spec);
        let disks = obj.pointer("/spec/template/spec/domain/devices/disks").and_then(|v| v.as_array()).unwrap();
        let ifaces = obj.pointer("/spec/template/spec/domain/devices/interfaces").and_then(|v| v.as_array()).unwrap();
        let volumes = obj.pointer("/spec/template/spec/volumes").and_then(|v| v.as_array()).unwrap();
        let networks = obj.pointer("/spec/template/spec/networks").and_then(|v| v.as_array()).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(ifaces.len(), 1);
        assert_eq!(volumes.len(), 1);
        assert_eq!(networks.len(), 1);
        assert_eq!(disks[0]["name"], "testdisk");
        assert_eq!(ifaces[0]["name"], "nic1");
        assert_eq!(networks[0]["multus"]["networkName"], "test-nad");
        // One blank disk means exactly one templated data volume.
        let dvs = obj.pointer("/spec/dataVolumeTemplates").and_then(|v| v.as_array()).unwrap();
        assert_eq!(dvs.len(), 1);
        assert_eq!(dvs[0]["metadata"]["name"], "vm-example-testdisk");
    }

    #[test]
    fn pvc_backed_disk_references_the_claim_without_a_template() {
        let spec = VmSpec::new("vm-pvc", "web")
            .with_disk(DiskSpec { name: "root".into(), pvc: Some("root-claim".into()), size_gi: 10, storage_class: None });
        let obj = build_vm_object(&spec);
        let volumes = obj.pointer("/spec/template/spec/volumes").and_then(|v| v.as_array()).unwrap();
        assert_eq!(volumes[0]["persistentVolumeClaim"]["claimName"], "root-claim");
        assert!(obj.pointer("/spec/dataVolumeTemplates").is_none());
    }

    #[tokio::test]
    async fn colliding_name_fails_locally_and_keeps_the_session_open() {
        let actions = Arc::new(MockActions::new());
        let mut session =
            open_session(vec![existing_vm("example", "web")], Arc::clone(&actions), "web").await;

        // Mixed case collides with the normalized existing name.
        let err = session.submit(&VmSpec::new("EXAMPLE", "web")).await.unwrap_err();
        assert!(matches!(err, WizardError::NameTaken(ref n) if n == "example"));
        assert!(matches!(session.error(), Some(WizardError::NameTaken(_))));
        assert!(actions.calls().is_empty(), "no request may reach the server on a local collision");

        // The session survives the failure: a fresh name goes through and
        // clears the recorded error.
        session.submit(&VmSpec::new("example-2", "web")).await.unwrap();
        assert!(session.error().is_none());
        assert_eq!(actions.created_names(), vec!["example-2".to_string()]);
    }

    #[tokio::test]
    async fn same_name_in_another_namespace_is_not_a_collision() {
        let actions = Arc::new(MockActions::new());
        let mut session =
            open_session(vec![existing_vm("example", "db")], Arc::clone(&actions), "web").await;
        session.submit(&VmSpec::new("example", "web")).await.unwrap();
        assert_eq!(actions.created_names(), vec!["example".to_string()]);
    }

    #[tokio::test]
    async fn server_side_conflict_maps_to_a_local_name_error() {
        let actions = Arc::new(MockActions::new());
        actions.conflict_on("example");
        // The local list is stale (empty), so the collision only shows up as
        // the server's 409.
        let mut session = open_session(Vec::new(), Arc::clone(&actions), "web").await;
        let err = session.submit(&VmSpec::new("example", "web")).await.unwrap_err();
        assert!(matches!(err, WizardError::NameTaken(ref n) if n == "example"));
        assert!(session.error().is_some());
    }

    #[tokio::test]
    async fn empty_name_is_rejected_before_any_lookup() {
        let actions = Arc::new(MockActions::new());
        let mut session = open_session(Vec::new(), Arc::clone(&actions), "web").await;
        let err = session.submit(&VmSpec::new("  ", "web")).await.unwrap_err();
        assert!(matches!(err, WizardError::Invalid(_)));
        assert!(actions.calls().is_empty());
    }
}
