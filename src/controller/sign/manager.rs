use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::maker::SignJobMaker;
use crate::controller::client::ResourceClient;
use crate::controller::labels::{ModuleKey, ResourceKey, JOB_TYPE_SIGN};
use crate::controller::manager::{Manager, OwnerObject};
use crate::controller::status::SyncResult;
use crate::controller::sync::{collect_garbage, sync_generated};
use crate::crd::{KernelMapping, Module};
use crate::error::Result;
use crate::kernel;
use crate::registry::{AuthGetterFactory, ImageRegistry};

/// Signs kernel module images with Jobs
pub struct SignManager {
    client: Arc<dyn ResourceClient<Job>>,
    maker: Arc<dyn SignJobMaker>,
    registry: Arc<dyn ImageRegistry>,
    auth: Arc<dyn AuthGetterFactory>,
}

impl SignManager {
    pub fn new(
        client: Arc<dyn ResourceClient<Job>>,
        maker: Arc<dyn SignJobMaker>,
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
impl Manager for SignManager {
    #[instrument(skip_all, fields(module = %module.name_any()))]
    async fn should_sync(&self, module: &Module, mapping: &KernelMapping) -> Result<bool> {
        if !kernel::should_be_signed(&module.spec, mapping) {
            debug!("No sign step declared");
            return Ok(false);
        }

        let image = kernel::container_image(mapping)?;
        let tls = kernel::registry_tls_for(&module.spec, mapping);
        let auth = self.auth.for_module(module);
        let exists = self
            .registry
            .image_exists(image, &tls, auth.as_ref())
            .await?;

        if exists {
            debug!("Signed image {} already exists", image);
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
        let image = kernel::container_image(mapping)?;
        let template =
            self.maker
                .make_template(module, mapping, target_kernel, image, push_image, owner)?;

        let key = ResourceKey::new(module, target_kernel).with_job_type(JOB_TYPE_SIGN);
        let result = sync_generated(self.client.as_ref(), &key, template).await?;
        info!("Sign job for image {} is {}", image, result.status);
        Ok(result)
    }

    #[instrument(skip_all, fields(module = %module.name_any()))]
    async fn garbage_collect(
        &self,
        module: &Module,
        declared_kernels: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let key = ModuleKey::new(module).with_job_type(JOB_TYPE_SIGN);
        collect_garbage(self.client.as_ref(), &key, declared_kernels).await
    }
}
