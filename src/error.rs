//! Error types for the KMM operator core

use thiserror::Error;

use crate::controller::SyncStatus;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed user configuration (no build/sign spec, bad image reference, ...)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Cluster state that the operator never produces itself
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A generated resource reported a phase outside the known vocabulary
    #[error("{kind} {name} reported unknown phase {phase:?}")]
    UnknownPhase {
        kind: String,
        name: String,
        phase: String,
    },

    /// A generated resource finished unsuccessfully; retrying the same template would fail again
    #[error("{kind} {name} failed: {message}")]
    TerminalFailure {
        kind: String,
        name: String,
        message: String,
    },

    /// Image registry answered with something other than found/not found
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// HTTP transport error talking to an image registry
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the controller's requeue-with-backoff is likely to resolve this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::RegistryError(_) | Error::HttpError(_)
        )
    }

    /// Sync status the outer reconciler should record for this error, if any.
    pub fn sync_status(&self) -> Option<SyncStatus> {
        match self {
            Error::TerminalFailure { .. } => Some(SyncStatus::Failed),
            _ => None,
        }
    }

    /// True for a Kubernetes 404 response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "NotFound".to_string(),
            code,
        }))
    }

    #[test]
    fn test_kube_errors_are_retriable() {
        assert!(api_error(500).is_retriable());
        assert!(!Error::ConfigError("no build".into()).is_retriable());
        assert!(!Error::InvariantViolation("two builds".into()).is_retriable());
    }

    #[test]
    fn test_terminal_failure_maps_to_failed_status() {
        let err = Error::TerminalFailure {
            kind: "Build".into(),
            name: "mod-build-abcde".into(),
            message: "error: no such file".into(),
        };
        assert_eq!(err.sync_status(), Some(SyncStatus::Failed));
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("no such file"));
        assert_eq!(Error::RegistryError("x".into()).sync_status(), None);
    }

    #[test]
    fn test_is_not_found() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
    }
}
