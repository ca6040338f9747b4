//! Static registry of the resource kinds the overview and wizard consume.

use crate::descriptor::{DescriptorOpts, ResourceDescriptor};

/// Static description of a served resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl Model {
    /// Derive a descriptor with per-call overrides, the registry's
    /// counterpart to `getResource(Model, opts)`.
    pub fn descriptor(&self, opts: DescriptorOpts) -> ResourceDescriptor {
        ResourceDescriptor::new(self, opts)
    }

    /// Descriptor with defaults: list-shaped, model scoping, no selector.
    pub fn list(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(self, DescriptorOpts::default())
    }
}

pub const NODE: Model =
    Model { group: "", version: "v1", kind: "Node", plural: "nodes", namespaced: false };
pub const POD: Model =
    Model { group: "", version: "v1", kind: "Pod", plural: "pods", namespaced: true };
pub const NAMESPACE: Model =
    Model { group: "", version: "v1", kind: "Namespace", plural: "namespaces", namespaced: false };
pub const PERSISTENT_VOLUME_CLAIM: Model = Model {
    group: "",
    version: "v1",
    kind: "PersistentVolumeClaim",
    plural: "persistentvolumeclaims",
    namespaced: true,
};
pub const STORAGE_CLASS: Model = Model {
    group: "storage.k8s.io",
    version: "v1",
    kind: "StorageClass",
    plural: "storageclasses",
    namespaced: false,
};
pub const TEMPLATE: Model = Model {
    group: "template.openshift.io",
    version: "v1",
    kind: "Template",
    plural: "templates",
    namespaced: true,
};
pub const INFRASTRUCTURE: Model = Model {
    group: "config.openshift.io",
    version: "v1",
    kind: "Infrastructure",
    plural: "infrastructures",
    namespaced: false,
};
pub const VIRTUAL_MACHINE: Model = Model {
    group: "kubevirt.io",
    version: "v1alpha3",
    kind: "VirtualMachine",
    plural: "virtualmachines",
    namespaced: true,
};
pub const VM_INSTANCE_MIGRATION: Model = Model {
    group: "kubevirt.io",
    version: "v1alpha3",
    kind: "VirtualMachineInstanceMigration",
    plural: "virtualmachineinstancemigrations",
    namespaced: true,
};
pub const DATA_VOLUME: Model = Model {
    group: "cdi.kubevirt.io",
    version: "v1alpha1",
    kind: "DataVolume",
    plural: "datavolumes",
    namespaced: true,
};
pub const NETWORK_ATTACHMENT_DEFINITION: Model = Model {
    group: "k8s.cni.cncf.io",
    version: "v1",
    kind: "NetworkAttachmentDefinition",
    plural: "network-attachment-definitions",
    namespaced: true,
};
pub const BAREMETAL_HOST: Model = Model {
    group: "metal3.io",
    version: "v1alpha1",
    kind: "BareMetalHost",
    plural: "baremetalhosts",
    namespaced: true,
};

/// All registered models, stable order.
pub const ALL: &[Model] = &[
    NODE,
    POD,
    NAMESPACE,
    PERSISTENT_VOLUME_CLAIM,
    STORAGE_CLASS,
    TEMPLATE,
    INFRASTRUCTURE,
    VIRTUAL_MACHINE,
    VM_INSTANCE_MIGRATION,
    DATA_VOLUME,
    NETWORK_ATTACHMENT_DEFINITION,
    BAREMETAL_HOST,
];

/// Look a model up by its kind name (case-insensitive).
pub fn by_kind(kind: &str) -> Option<&'static Model> {
    ALL.iter().find(|m| m.kind.eq_ignore_ascii_case(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_kind_is_case_insensitive() {
        assert_eq!(by_kind("virtualmachine"), Some(&VIRTUAL_MACHINE));
        assert_eq!(by_kind("Node"), Some(&NODE));
        assert!(by_kind("NoSuchKind").is_none());
    }

    #[test]
    fn core_group_models_have_empty_group() {
        assert_eq!(NODE.group, "");
        assert_eq!(POD.group, "");
        assert!(!NODE.namespaced);
        assert!(POD.namespaced);
    }
}
