//! Lookup of generated resources by label

use kube::ResourceExt;
use tracing::debug;

use super::client::ResourceClient;
use super::labels::{ModuleKey, ResourceKey};
use crate::crd::openshift::BUILD_CONFIG_LABEL;
use crate::crd::Build;
use crate::error::{Error, Result};

pub struct Locator<'a, K>
where
    K: Send + Sync + 'static,
{
    client: &'a dyn ResourceClient<K>,
}

impl<'a, K> Locator<'a, K>
where
    K: kube::Resource<DynamicType = ()> + Send + Sync + 'static,
{
    pub fn new(client: &'a dyn ResourceClient<K>) -> Self {
        Self { client }
    }

    /// The single generated resource for `key`.
    ///
    /// Returns `Ok(None)` when there is none. More than one match can only
    /// come from a bug or external tampering and is reported as an invariant
    /// violation, never resolved by picking one.
    pub async fn find(&self, key: &ResourceKey) -> Result<Option<K>> {
        let mut items = self
            .client
            .list(&key.module_namespace, &key.selector())
            .await?;

        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            n => {
                let names: Vec<String> = items.iter().map(|o| o.name_any()).collect();
                Err(Error::InvariantViolation(format!(
                    "expected at most one {} for module {}/{} kernel {}, found {n}: {}",
                    K::kind(&()),
                    key.module_namespace,
                    key.module_name,
                    key.target_kernel,
                    names.join(", ")
                )))
            }
        }
    }

    /// Every generated resource of the module, across kernels.
    pub async fn list_for_module(&self, key: &ModuleKey) -> Result<Vec<K>> {
        self.client
            .list(&key.module_namespace, &key.selector())
            .await
    }
}

impl Locator<'_, Build> {
    /// The most recently created Build started from `build_config`.
    ///
    /// Unlike [`Locator::find`], several Builds per BuildConfig are expected
    /// (one per run), so the newest wins.
    pub async fn latest_build_for_config(
        &self,
        namespace: &str,
        build_config: &str,
    ) -> Result<Option<Build>> {
        let builds = self
            .client
            .list(namespace, &format!("{BUILD_CONFIG_LABEL}={build_config}"))
            .await?;
        debug!(
            "Found {} builds for BuildConfig {}/{}",
            builds.len(),
            namespace,
            build_config
        );

        Ok(builds
            .into_iter()
            .max_by(|a, b| a.creation_timestamp().cmp(&b.creation_timestamp())))
    }
}
