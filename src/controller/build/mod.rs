//! OpenShift Build generation for kernel module images

mod maker;
mod manager;

pub use maker::{BuildMaker, DefaultBuildMaker, BUILD_SECRETS_DIR};
pub use manager::BuildManager;

use super::status::Phase;
use super::sync::GeneratedResource;
use crate::crd::Build;

impl GeneratedResource for Build {
    fn phase(&self) -> Result<Phase, String> {
        match self.status.as_ref().map(|s| s.phase.as_str()) {
            // The build subsystem has not picked the Build up yet
            None | Some("") => Ok(Phase::New),
            Some(phase) => phase.parse(),
        }
    }

    fn failure_message(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| {
                s.log_snippet
                    .clone()
                    .or_else(|| s.message.clone())
                    .or_else(|| s.reason.clone())
            })
            .unwrap_or_else(|| "build failed without a reason".to_string())
    }
}
