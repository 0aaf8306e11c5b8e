//! Custom Resource Definitions for the KMM operator
//!
//! `Module` is owned by this operator; `Build` belongs to the OpenShift build
//! subsystem and is only modelled so it can be created and watched.

mod module;
pub mod openshift;
pub mod types;


pub use module::{
    KernelMapping, ModprobeSpec, Module, ModuleBuildSpec, ModuleLoaderContainerSpec,
    ModuleLoaderSpec, ModuleSignSpec, ModuleSpec,
};
pub use openshift::{Build, BuildSpec, BuildStatus};
pub use types::*;
