//! Build and sign orchestration for Modules
//!
//! For every (Module, kernel) pair the Module reconciler asks each [`Manager`]
//! whether its artifact is missing, then drives a generated Build or Job
//! toward it. Each call is one step of a state machine derived from cluster
//! state; nothing is cached between calls.

pub mod build;
pub mod client;
pub mod labels;
pub mod locator;
pub mod manager;
pub mod sign;
pub mod status;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use build::{BuildManager, DefaultBuildMaker};
pub use client::{KubeResourceClient, ResourceClient};
pub use labels::{ModuleKey, ResourceKey};
pub use locator::Locator;
pub use manager::{Manager, OwnerObject};
pub use sign::{DefaultSignJobMaker, SignManager};
pub use status::{Phase, SyncResult, SyncStatus};
pub use sync::{collect_garbage, fingerprint, sync_generated, GeneratedResource};
