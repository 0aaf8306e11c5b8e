//! Module Custom Resource Definition
//!
//! A Module declares an out-of-tree kernel module: which image to load on
//! which kernels, and optionally how to build and sign that image when it
//! does not exist yet.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BuildArg, RegistryTlsOptions, SecretRef};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kmm.sigs.x-k8s.io",
    version = "v1beta1",
    kind = "Module",
    namespaced,
    shortname = "mod",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub module_loader: ModuleLoaderSpec,

    /// Pull secret used for registry lookups and by generated builds/jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repo_secret: Option<SecretRef>,

    /// Node selector for the nodes that should load this module
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// Namespace assumed for a Module whose metadata carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

impl Module {
    /// Namespace of the Module, which is also where its Builds, Jobs and
    /// pull secret live.
    pub fn namespace_or_default(&self) -> String {
        self.namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLoaderSpec {
    pub container: ModuleLoaderContainerSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLoaderContainerSpec {
    pub modprobe: ModprobeSpec,

    /// Default image for mappings that do not set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    #[serde(default)]
    pub kernel_mappings: Vec<KernelMapping>,

    /// Module-level build defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ModuleBuildSpec>,

    /// Module-level sign defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<ModuleSignSpec>,

    #[serde(default, rename = "registryTLS")]
    pub registry_tls: RegistryTlsOptions,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModprobeSpec {
    pub module_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_name: Option<String>,
}

/// Per-kernel override of image, build and sign parameters.
///
/// Exactly one of `literal` and `regexp` selects the kernels it applies to.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KernelMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,

    /// Image to load; may contain `${KERNEL_FULL_VERSION}` style variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ModuleBuildSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<ModuleSignSpec>,

    #[serde(default, rename = "registryTLS", skip_serializing_if = "Option::is_none")]
    pub registry_tls: Option<RegistryTlsOptions>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBuildSpec {
    /// Inline Dockerfile content
    #[serde(default)]
    pub dockerfile: String,

    #[serde(default)]
    pub build_args: Vec<BuildArg>,

    /// Secrets exposed to the build under `/run/secrets/<name>`
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSignSpec {
    /// Image to sign; when unset, the image produced by the build step is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_image: Option<String>,

    pub key_secret: SecretRef,

    pub cert_secret: SecretRef,

    /// Paths inside the image of the `.ko` files to sign
    #[serde(default)]
    pub files_to_sign: Vec<String>,

    #[serde(default, rename = "unsignedImageRegistryTLS")]
    pub unsigned_image_registry_tls: RegistryTlsOptions,
}
