use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::maker::BuildMaker;
use crate::controller::client::ResourceClient;
use crate::controller::labels::{ModuleKey, ResourceKey};
use crate::controller::manager::{Manager, OwnerObject};
use crate::controller::status::SyncResult;
use crate::controller::sync::{collect_garbage, sync_generated};
use crate::crd::{Build, KernelMapping, Module};
use crate::error::Result;
use crate::kernel;
use crate::registry::{AuthGetterFactory, ImageRegistry};

/// Builds kernel module images with OpenShift Builds
pub struct BuildManager {
    client: Arc<dyn ResourceClient<Build>>,
    maker: Arc<dyn BuildMaker>,
    registry: Arc<dyn ImageRegistry>,
    auth: Arc<dyn AuthGetterFactory>,
}

impl BuildManager {
    pub fn new(
        client: Arc<dyn ResourceClient<Build>>,
        maker: Arc<dyn BuildMaker>,
        registry: Arc<dyn ImageRegistry>,
        auth: Arc<dyn AuthGetterFactory>,
    ) -> Self {
        Self {
            client,
            maker,
            registry,
            auth,
        }
    }
}

#[async_trait]
impl Manager for BuildManager {
    #[instrument(skip_all, fields(module = %module.name_any()))]
    async fn should_sync(&self, module: &Module, mapping: &KernelMapping) -> Result<bool> {
        if !kernel::should_be_built(&module.spec, mapping) {
            debug!("No build step declared");
            return Ok(false);
        }

        let image = kernel::build_target_image(module, mapping)?;
        let tls = kernel::registry_tls_for(&module.spec, mapping);
        let auth = self.auth.for_module(module);
        let exists = self
            .registry
            .image_exists(&image, &tls, auth.as_ref())
            .await?;

        if exists {
            debug!("Image {} already exists, build not needed", image);
        }
        Ok(!exists)
    }

    #[instrument(skip_all, fields(module = %module.name_any(), kernel = %target_kernel))]
    async fn sync(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<SyncResult> {
        let image = kernel::build_target_image(module, mapping)?;
        let template =
            self.maker
                .make_template(module, mapping, target_kernel, &image, push_image, owner)?;

        let key = ResourceKey::new(module, target_kernel);
        let result = sync_generated(self.client.as_ref(), &key, template).await?;
        info!("Build for image {} is {}", image, result.status);
        Ok(result)
    }

    #[instrument(skip_all, fields(module = %module.name_any()))]
    async fn garbage_collect(
        &self,
        module: &Module,
        declared_kernels: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let key = ModuleKey::new(module);
        collect_garbage(self.client.as_ref(), &key, declared_kernels).await
    }
}
