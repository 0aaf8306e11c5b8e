//! Build template generation

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use crate::controller::labels::{ResourceKey, HASH_ANNOTATION};
use crate::controller::manager::{controller_owner_reference, OwnerObject};
use crate::controller::sync::fingerprint;
use crate::crd::openshift::{
    BuildEnvVar, BuildOutput, BuildSource, BuildStrategy, BuildVolume, BuildVolumeMount,
    BuildVolumeSource, DockerBuildStrategy, LocalObjectReference, ObjectReference,
    SecretVolumeSource,
};
use crate::crd::{Build, BuildArg, BuildSpec, KernelMapping, Module, SecretRef};
use crate::error::{Error, Result};
use crate::kernel;

/// Where build secrets are visible to Dockerfile `RUN` steps
pub const BUILD_SECRETS_DIR: &str = "/run/secrets";

const KERNEL_VERSION_ARG: &str = "KERNEL_VERSION";

/// Produces the Build template for one (module, kernel) pair
pub trait BuildMaker: Send + Sync {
    /// Fully specified Build, without identity, carrying its fingerprint annotation.
    fn make_template(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        container_image: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<Build>;
}

pub struct DefaultBuildMaker {
    service_account: String,
}

impl DefaultBuildMaker {
    pub fn new(service_account: impl Into<String>) -> Self {
        Self {
            service_account: service_account.into(),
        }
    }
}

/// The part of a Build that decides what gets built
#[derive(Serialize)]
struct BuildContent<'a> {
    source: &'a BuildSource,
    strategy: &'a BuildStrategy,
}

/// User arguments followed by the kernel version, which replaces any user argument of the same name.
fn build_args(args: &[BuildArg], target_kernel: &str) -> Vec<BuildEnvVar> {
    args.iter()
        .filter(|a| a.name != KERNEL_VERSION_ARG)
        .map(|a| BuildEnvVar {
            name: a.name.clone(),
            value: Some(a.value.clone()),
        })
        .chain(std::iter::once(BuildEnvVar {
            name: KERNEL_VERSION_ARG.to_string(),
            value: Some(target_kernel.to_string()),
        }))
        .collect()
}

fn secret_volume(secret: &SecretRef) -> BuildVolume {
    BuildVolume {
        name: format!("secret-{}", secret.name),
        source: BuildVolumeSource {
            type_: "Secret".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: secret.name.clone(),
                optional: false,
            }),
        },
        mounts: vec![BuildVolumeMount {
            destination_path: format!("{BUILD_SECRETS_DIR}/{}", secret.name),
        }],
    }
}

impl BuildMaker for DefaultBuildMaker {
    fn make_template(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        container_image: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<Build> {
        let build_spec = kernel::build_spec_for(&module.spec, mapping).ok_or_else(|| {
            Error::ConfigError(format!(
                "module {} has no build spec for kernel {target_kernel}",
                module.name_any()
            ))
        })?;
        let owner_ref = controller_owner_reference(owner)?;
        let pull_secret = module
            .spec
            .image_repo_secret
            .as_ref()
            .map(|s| LocalObjectReference {
                name: s.name.clone(),
            });

        let source = BuildSource {
            type_: "Dockerfile".to_string(),
            dockerfile: Some(build_spec.dockerfile.clone()),
        };
        let strategy = BuildStrategy {
            type_: "Docker".to_string(),
            docker_strategy: Some(DockerBuildStrategy {
                build_args: build_args(&build_spec.build_args, target_kernel),
                volumes: build_spec.secrets.iter().map(secret_volume).collect(),
                pull_secret: pull_secret.clone(),
                no_cache: true,
            }),
        };

        let output = if push_image {
            BuildOutput {
                to: Some(ObjectReference {
                    kind: "DockerImage".to_string(),
                    name: container_image.to_string(),
                }),
                push_secret: pull_secret,
            }
        } else {
            BuildOutput::default()
        };

        let hash = fingerprint(&BuildContent {
            source: &source,
            strategy: &strategy,
        })?;

        let key = ResourceKey::new(module, target_kernel);
        let node_selector =
            (!module.spec.selector.is_empty()).then(|| module.spec.selector.clone());

        Ok(Build {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-build-", module.name_any())),
                namespace: Some(key.module_namespace.clone()),
                labels: Some(key.resource_labels()),
                annotations: Some(BTreeMap::from([(HASH_ANNOTATION.to_string(), hash)])),
                owner_references: Some(vec![owner_ref]),
                ..Default::default()
            },
            spec: BuildSpec {
                service_account: Some(self.service_account.clone()),
                source,
                strategy,
                output,
                node_selector,
            },
            status: None,
        })
    }
}
