//! Sign Job template generation
//!
//! The Job runs the signing image, which pulls the unsigned image, signs the
//! listed kernel module files with the key/cert pair and pushes the result as
//! the final image (unless pushing is disabled).

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, KeyToPath, PodSpec, PodTemplateSpec, ProjectedVolumeSource, SecretProjection,
    Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;

use crate::controller::labels::{ResourceKey, HASH_ANNOTATION, JOB_TYPE_SIGN};
use crate::controller::manager::{controller_owner_reference, OwnerObject};
use crate::controller::sync::fingerprint;
use crate::crd::{KernelMapping, Module, ModuleSignSpec};
use crate::error::{Error, Result};
use crate::kernel;

const KEY_MOUNT_PATH: &str = "/signingkey";
const CERT_MOUNT_PATH: &str = "/signingcert";
const PULL_SECRET_MOUNT_PATH: &str = "/docker_config";

/// Produces the sign Job template for one (module, kernel) pair
pub trait SignJobMaker: Send + Sync {
    /// Fully specified Job, without identity, carrying its fingerprint annotation.
    fn make_template(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        container_image: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<Job>;
}

pub struct DefaultSignJobMaker {
    sign_image: String,
}

impl DefaultSignJobMaker {
    pub fn new(sign_image: impl Into<String>) -> Self {
        Self {
            sign_image: sign_image.into(),
        }
    }
}

/// The part of a Job that decides what gets signed
#[derive(Serialize)]
struct SignContent<'a> {
    container: &'a Container,
    volumes: &'a [Volume],
}

// ─── Volume helpers ───────────────────────────────────────────────────────────

/// Project a single key of a Secret as `path` inside the volume.
fn secret_file_volume(volume_name: &str, secret_name: &str, key: &str, path: &str) -> Volume {
    Volume {
        name: volume_name.to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(vec![VolumeProjection {
                secret: Some(SecretProjection {
                    name: Some(secret_name.to_string()),
                    items: Some(vec![KeyToPath {
                        key: key.to_string(),
                        path: path.to_string(),
                        ..Default::default()
                    }]),
                    optional: Some(false),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// The image to sign: explicitly configured, or the one the build step pushes.
fn unsigned_image(
    module: &Module,
    mapping: &KernelMapping,
    sign: &ModuleSignSpec,
    target_kernel: &str,
    container_image: &str,
) -> Result<String> {
    if let Some(image) = &sign.unsigned_image {
        let vars = kernel::template_variables(module, target_kernel);
        return Ok(kernel::substitute(image, &vars));
    }

    if kernel::should_be_built(&module.spec, mapping) {
        return Ok(kernel::intermediate_image_name(
            &module.name_any(),
            &module.namespace_or_default(),
            container_image,
        ));
    }

    Err(Error::ConfigError(format!(
        "module {} signs kernel {target_kernel} but neither an unsigned image nor a build is declared",
        module.name_any()
    )))
}

impl SignJobMaker for DefaultSignJobMaker {
    fn make_template(
        &self,
        module: &Module,
        mapping: &KernelMapping,
        target_kernel: &str,
        container_image: &str,
        push_image: bool,
        owner: &dyn OwnerObject,
    ) -> Result<Job> {
        let sign = kernel::sign_spec_for(&module.spec, mapping).ok_or_else(|| {
            Error::ConfigError(format!(
                "module {} has no sign spec for kernel {target_kernel}",
                module.name_any()
            ))
        })?;
        let owner_ref = controller_owner_reference(owner)?;
        let unsigned = unsigned_image(module, mapping, &sign, target_kernel, container_image)?;

        let mut args = vec![
            "-unsignedimage".to_string(),
            unsigned,
            "-key".to_string(),
            format!("{KEY_MOUNT_PATH}/key.pem"),
            "-cert".to_string(),
            format!("{CERT_MOUNT_PATH}/cert.pem"),
            "-filestosign".to_string(),
            sign.files_to_sign.join(":"),
        ];
        if push_image {
            args.extend(["-signedimage".to_string(), container_image.to_string()]);
        } else {
            args.push("-no-push".to_string());
        }

        let mut volumes = vec![
            secret_file_volume("key", &sign.key_secret.name, "key", "key.pem"),
            secret_file_volume("cert", &sign.cert_secret.name, "cert", "cert.pem"),
        ];
        let mut mounts = vec![
            read_only_mount("key", KEY_MOUNT_PATH),
            read_only_mount("cert", CERT_MOUNT_PATH),
        ];

        if let Some(secret) = &module.spec.image_repo_secret {
            args.extend([
                "-pullsecret".to_string(),
                format!("{PULL_SECRET_MOUNT_PATH}/config.json"),
            ]);
            volumes.push(secret_file_volume(
                "pull-secret",
                &secret.name,
                ".dockerconfigjson",
                "config.json",
            ));
            mounts.push(read_only_mount("pull-secret", PULL_SECRET_MOUNT_PATH));
        }

        if sign.unsigned_image_registry_tls.insecure {
            args.push("--insecure".to_string());
        }
        if sign.unsigned_image_registry_tls.insecure_skip_tls_verify {
            args.push("--skip-tls-verify".to_string());
        }

        let container = Container {
            name: "signimage".to_string(),
            image: Some(self.sign_image.clone()),
            args: Some(args),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        let hash = fingerprint(&SignContent {
            container: &container,
            volumes: &volumes,
        })?;

        let key = ResourceKey::new(module, target_kernel).with_job_type(JOB_TYPE_SIGN);
        let node_selector =
            (!module.spec.selector.is_empty()).then(|| module.spec.selector.clone());

        Ok(Job {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-sign-", module.name_any())),
                namespace: Some(key.module_namespace.clone()),
                labels: Some(key.resource_labels()),
                annotations: Some(BTreeMap::from([(HASH_ANNOTATION.to_string(), hash)])),
                owner_references: Some(vec![owner_ref]),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(key.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![container],
                        volumes: Some(volumes),
                        node_selector,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        })
    }
}
