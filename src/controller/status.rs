//! Sync result vocabulary shared by the build and sign managers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of one sync attempt, as seen by the outer reconciler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// The generated resource was just created
    Created,
    /// The generated resource exists and has not finished, or is being replaced
    InProgress,
    /// The generated resource finished successfully
    Completed,
    /// The generated resource finished unsuccessfully
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Created => "Created",
            SyncStatus::InProgress => "InProgress",
            SyncStatus::Completed => "Completed",
            SyncStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    /// The caller should poll again soon
    pub requeue: bool,
}

impl SyncResult {
    pub fn created() -> Self {
        Self {
            status: SyncStatus::Created,
            requeue: true,
        }
    }

    pub fn in_progress() -> Self {
        Self {
            status: SyncStatus::InProgress,
            requeue: true,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: SyncStatus::Completed,
            requeue: false,
        }
    }
}

/// Lifecycle phase of a generated Build or Job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Phase::New),
            "Pending" => Ok(Phase::Pending),
            "Running" => Ok(Phase::Running),
            "Complete" => Ok(Phase::Complete),
            "Failed" => Ok(Phase::Failed),
            "Cancelled" => Ok(Phase::Cancelled),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_hints() {
        assert!(SyncResult::created().requeue);
        assert!(SyncResult::in_progress().requeue);
        assert!(!SyncResult::completed().requeue);
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("Running".parse::<Phase>(), Ok(Phase::Running));
        assert_eq!("Cancelled".parse::<Phase>(), Ok(Phase::Cancelled));
        assert_eq!("Error".parse::<Phase>(), Err("Error".to_string()));
        assert_eq!("running".parse::<Phase>(), Err("running".to_string()));
    }
}
