//! Labels and annotations stamped on generated resources
//!
//! Generated Builds and Jobs get generator-assigned names, so they are found
//! again through their labels. Only `ModuleKey` and `ResourceKey` produce
//! those labels, for both the create path and the lookup path.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::Module;

/// Name of the owning Module
pub const MODULE_NAME_LABEL: &str = "kmm.node.kubernetes.io/module.name";

/// Namespace of the owning Module
pub const MODULE_NAMESPACE_LABEL: &str = "kmm.node.kubernetes.io/module.namespace";

/// Kernel version the resource builds or signs for
pub const TARGET_KERNEL_LABEL: &str = "kmm.node.kubernetes.io/target-kernel";

/// Distinguishes sign Jobs from other Jobs owned by the same Module
pub const JOB_TYPE_LABEL: &str = "kmm.node.kubernetes.io/job-type";

pub const JOB_TYPE_SIGN: &str = "sign";

/// Fingerprint of the content-relevant part of the resource spec
pub const HASH_ANNOTATION: &str = "kmm.node.kubernetes.io/last-hash";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "kmm-operator";

/// Key of every generated resource of one module: (module[, job type])
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    pub module_name: String,
    pub module_namespace: String,
    pub job_type: Option<String>,
}

impl ModuleKey {
    pub fn new(module: &Module) -> Self {
        Self {
            module_name: module.name_any(),
            module_namespace: module.namespace_or_default(),
            job_type: None,
        }
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job_type = Some(job_type.to_string());
        self
    }

    /// Narrow the key to the resources generated for one kernel.
    pub fn for_kernel(&self, target_kernel: &str) -> ResourceKey {
        ResourceKey {
            module_name: self.module_name.clone(),
            module_namespace: self.module_namespace.clone(),
            target_kernel: target_kernel.to_string(),
            job_type: self.job_type.clone(),
        }
    }

    /// Labels identifying every generated resource of the module, regardless of kernel.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(MODULE_NAME_LABEL.to_string(), self.module_name.clone());
        labels.insert(
            MODULE_NAMESPACE_LABEL.to_string(),
            self.module_namespace.clone(),
        );
        if let Some(job_type) = &self.job_type {
            labels.insert(JOB_TYPE_LABEL.to_string(), job_type.clone());
        }
        labels
    }

    /// Equality selector matching every kernel of the module.
    pub fn selector(&self) -> String {
        to_selector(&self.labels())
    }
}

/// Composite lookup key of a generated resource: (module, kernel[, job type])
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub module_name: String,
    pub module_namespace: String,
    pub target_kernel: String,
    pub job_type: Option<String>,
}

impl ResourceKey {
    pub fn new(module: &Module, target_kernel: &str) -> Self {
        ModuleKey::new(module).for_kernel(target_kernel)
    }

    pub fn with_job_type(mut self, job_type: &str) -> Self {
        self.job_type = Some(job_type.to_string());
        self
    }

    /// The module-wide key this key narrows.
    pub fn module_key(&self) -> ModuleKey {
        ModuleKey {
            module_name: self.module_name.clone(),
            module_namespace: self.module_namespace.clone(),
            job_type: self.job_type.clone(),
        }
    }

    /// Labels identifying exactly this key.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.module_key().labels();
        labels.insert(TARGET_KERNEL_LABEL.to_string(), self.target_kernel.clone());
        labels
    }

    /// Labels set on a freshly generated resource.
    pub fn resource_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        labels
    }

    /// Equality selector matching exactly this key.
    pub fn selector(&self) -> String {
        to_selector(&self.labels())
    }
}

fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
