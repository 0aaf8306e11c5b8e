//! Kernel mapping resolution
//!
//! Helpers that turn a Module's declarative kernel mappings into the concrete
//! parameters used for one node kernel: which mapping applies, which image it
//! resolves to, and which build/sign settings are in effect once mapping-level
//! overrides are layered over the module-level defaults.

use std::collections::BTreeMap;

use kube::ResourceExt;
use regex::Regex;

use crate::crd::{
    KernelMapping, Module, ModuleBuildSpec, ModuleSignSpec, ModuleSpec, RegistryTlsOptions,
};
use crate::error::{Error, Result};

/// Tag suffix appended to images produced by a build that still need signing
const UNSIGNED_SUFFIX: &str = "kmm_unsigned";

/// Return the first mapping that applies to `kernel`.
///
/// A mapping must set exactly one of `literal` and `regexp`.
pub fn find_mapping<'a>(
    mappings: &'a [KernelMapping],
    kernel: &str,
) -> Result<Option<&'a KernelMapping>> {
    for mapping in mappings {
        let matches = match (&mapping.literal, &mapping.regexp) {
            (Some(literal), None) => literal == kernel,
            (None, Some(pattern)) => Regex::new(pattern)
                .map_err(|e| {
                    Error::ConfigError(format!("invalid kernel mapping regexp {pattern:?}: {e}"))
                })?
                .is_match(kernel),
            _ => {
                return Err(Error::ConfigError(
                    "kernel mapping must set exactly one of literal and regexp".to_string(),
                ))
            }
        };

        if matches {
            return Ok(Some(mapping));
        }
    }

    Ok(None)
}

/// Variables available for substitution in a mapping's container image.
pub fn template_variables(module: &Module, kernel: &str) -> BTreeMap<&'static str, String> {
    let mut vars = BTreeMap::new();
    vars.insert("KERNEL_FULL_VERSION", kernel.to_string());
    vars.insert("KERNEL_VERSION", kernel.to_string());

    // 5.14.0-284.el9.x86_64 -> X=5, Y=14, Z=0
    let numeric = kernel.split(['-', '+']).next().unwrap_or_default();
    let mut parts = numeric.split('.');
    let x = parts.next().unwrap_or_default().to_string();
    let y = parts.next().unwrap_or_default().to_string();
    let z = parts.next().unwrap_or_default().to_string();
    vars.insert("KERNEL_XYZ", format!("{x}.{y}.{z}"));
    vars.insert("KERNEL_X", x);
    vars.insert("KERNEL_Y", y);
    vars.insert("KERNEL_Z", z);

    vars.insert("MOD_NAME", module.name_any());
    vars.insert(
        "MOD_NAMESPACE",
        module.namespace_or_default(),
    );
    vars
}

/// Replace every `${NAME}` occurrence with its value. Unknown names are left untouched.
pub fn substitute(input: &str, vars: &BTreeMap<&'static str, String>) -> String {
    vars.iter().fold(input.to_string(), |acc, (name, value)| {
        acc.replace(&format!("${{{name}}}"), value)
    })
}

/// Produce the fully resolved mapping for one kernel: the container image is
/// defaulted from the module and its variables substituted, and the registry
/// TLS options are defaulted from the module.
pub fn resolve_mapping(
    module: &Module,
    mapping: &KernelMapping,
    kernel: &str,
) -> Result<KernelMapping> {
    let container = &module.spec.module_loader.container;
    let image = mapping
        .container_image
        .as_ref()
        .or(container.container_image.as_ref())
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "no container image for kernel {kernel} in module {}",
                module.name_any()
            ))
        })?;

    let vars = template_variables(module, kernel);
    let mut resolved = mapping.clone();
    resolved.container_image = Some(substitute(image, &vars));
    if resolved.registry_tls.is_none() {
        resolved.registry_tls = Some(container.registry_tls);
    }
    Ok(resolved)
}

/// The image a resolved mapping loads onto nodes.
pub fn container_image(mapping: &KernelMapping) -> Result<&str> {
    mapping
        .container_image
        .as_deref()
        .ok_or_else(|| Error::ConfigError("kernel mapping has no container image".to_string()))
}

/// Registry TLS options for the image of a mapping, falling back to the module's.
pub fn registry_tls_for(spec: &ModuleSpec, mapping: &KernelMapping) -> RegistryTlsOptions {
    mapping
        .registry_tls
        .unwrap_or(spec.module_loader.container.registry_tls)
}

pub fn should_be_built(spec: &ModuleSpec, mapping: &KernelMapping) -> bool {
    spec.module_loader.container.build.is_some() || mapping.build.is_some()
}

pub fn should_be_signed(spec: &ModuleSpec, mapping: &KernelMapping) -> bool {
    spec.module_loader.container.sign.is_some() || mapping.sign.is_some()
}

/// Build settings in effect for `mapping`; fields set on the mapping win.
pub fn build_spec_for(spec: &ModuleSpec, mapping: &KernelMapping) -> Option<ModuleBuildSpec> {
    match (&spec.module_loader.container.build, &mapping.build) {
        (None, None) => None,
        (Some(base), None) => Some(base.clone()),
        (None, Some(over)) => Some(over.clone()),
        (Some(base), Some(over)) => {
            let mut merged = base.clone();
            if !over.dockerfile.is_empty() {
                merged.dockerfile = over.dockerfile.clone();
            }
            for arg in &over.build_args {
                match merged.build_args.iter_mut().find(|a| a.name == arg.name) {
                    Some(existing) => existing.value = arg.value.clone(),
                    None => merged.build_args.push(arg.clone()),
                }
            }
            if !over.secrets.is_empty() {
                merged.secrets = over.secrets.clone();
            }
            Some(merged)
        }
    }
}

/// Sign settings in effect for `mapping`; fields set on the mapping win.
pub fn sign_spec_for(spec: &ModuleSpec, mapping: &KernelMapping) -> Option<ModuleSignSpec> {
    match (&spec.module_loader.container.sign, &mapping.sign) {
        (None, None) => None,
        (Some(base), None) => Some(base.clone()),
        (None, Some(over)) => Some(over.clone()),
        (Some(base), Some(over)) => {
            let mut merged = over.clone();
            if merged.unsigned_image.is_none() {
                merged.unsigned_image = base.unsigned_image.clone();
            }
            if merged.files_to_sign.is_empty() {
                merged.files_to_sign = base.files_to_sign.clone();
            }
            if merged.unsigned_image_registry_tls == Default::default() {
                merged.unsigned_image_registry_tls = base.unsigned_image_registry_tls;
            }
            Some(merged)
        }
    }
}

/// Append `suffix` to the tag of `image`, adding a tag if there is none.
pub fn append_to_tag(image: &str, suffix: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        format!("{image}_{suffix}")
    } else {
        format!("{image}:{suffix}")
    }
}

/// Name of the unsigned image a build pushes when a sign step follows it.
///
/// The name is unique per module so that two modules sharing a final image
/// never race on the intermediate one.
pub fn intermediate_image_name(name: &str, namespace: &str, image: &str) -> String {
    append_to_tag(image, &format!("{namespace}_{name}_{UNSIGNED_SUFFIX}"))
}

/// The image the build step must produce for a resolved mapping: the
/// intermediate image when a sign step follows, otherwise the final image.
pub fn build_target_image(module: &Module, mapping: &KernelMapping) -> Result<String> {
    let image = container_image(mapping)?;
    if should_be_signed(&module.spec, mapping) {
        Ok(intermediate_image_name(
            &module.name_any(),
            &module.namespace_or_default(),
            image,
        ))
    } else {
        Ok(image.to_string())
    }
}
