//! Image registry access
//!
//! The sync managers only need to know whether an image already exists; this
//! module provides that oracle plus the credential lookup it relies on.

pub mod auth;
pub mod client;
pub mod image_ref;

pub use auth::{
    AuthGetterFactory, DockerConfig, KubeAuthGetterFactory, NoAuth, RegistryAuthGetter,
    RegistryCredentials, SecretAuthGetter,
};
pub use client::{ImageRegistry, OciRegistry};
pub use image_ref::ImageRef;
