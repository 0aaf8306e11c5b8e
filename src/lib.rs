//! KMM operator core: building and signing out-of-tree kernel module images
//!
//! This crate provides the build/sign managers the Module reconciler uses to
//! produce one kernel module image per node kernel, plus the kernel mapping,
//! registry and configuration plumbing they depend on.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod telemetry;

pub use crate::error::{Error, Result};
