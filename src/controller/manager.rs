//! Contract between the Module reconciler and the build/sign managers

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use super::status::SyncResult;
use crate::crd::{KernelMapping, Module};
use crate::error::{Error, Result};

/// Anything that can own a generated resource through a controller reference
pub trait OwnerObject: Send + Sync {
    fn owner_reference(&self) -> Option<OwnerReference>;
}

impl<T> OwnerObject for T
where
    T: Resource<DynamicType = ()> + Send + Sync,
{
    fn owner_reference(&self) -> Option<OwnerReference> {
        self.controller_owner_ref(&())
    }
}

/// Controller owner reference for `owner`.
///
/// Objects without a name or UID (never persisted) cannot own anything.
pub fn controller_owner_reference(owner: &dyn OwnerObject) -> Result<OwnerReference> {
    owner.owner_reference().ok_or_else(|| {
        Error::ConfigError("owner object has no name or uid, cannot set owner reference".into())
    })
}

/// Produces one kind of artifact (built image, signed image) per kernel.
///
/// `mapping` is always a mapping already resolved for the target kernel.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Whether the artifact is missing and a generated resource must produce it.
    async fn should_sync(&self, module: &Module, mapping: &KernelMapping) -> Result<bool>;

    /// Drive the generated resource for (module, kernel) one step forward.
    async fn sync(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<SyncResult>;

    /// Delete generated resources for kernels not in `declared_kernels`; returns their names.
    async fn garbage_collect(
        &self,
        module: &Module,
        declared_kernels: &BTreeSet<String>,
    ) -> Result<Vec<String>>;
}
