//! Signing of kernel module images with one-shot Jobs

mod maker;
mod manager;

pub use maker::{DefaultSignJobMaker, SignJobMaker};
pub use manager::SignManager;

use k8s_openapi::api::batch::v1::{Job, JobCondition};

use super::status::Phase;
use super::sync::GeneratedResource;

fn condition<'a>(job: &'a Job, type_: &str) -> Option<&'a JobCondition> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
}

impl GeneratedResource for Job {
    fn phase(&self) -> Result<Phase, String> {
        let Some(status) = self.status.as_ref() else {
            return Ok(Phase::Pending);
        };

        if condition(self, "Complete").is_some() || status.succeeded.unwrap_or(0) > 0 {
            Ok(Phase::Complete)
        } else if condition(self, "Failed").is_some() {
            Ok(Phase::Failed)
        } else if status.active.unwrap_or(0) > 0 {
            Ok(Phase::Running)
        } else {
            Ok(Phase::Pending)
        }
    }

    fn failure_message(&self) -> String {
        condition(self, "Failed")
            .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
            .unwrap_or_else(|| "sign job failed without a reason".to_string())
    }
}
