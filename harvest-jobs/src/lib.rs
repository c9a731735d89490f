//! Durable job tracking for extraction runs.
//!
//! A [`Job`] moves through a small state machine and every accepted
//! transition is written to disk before the call returns, so the store can be
//! rebuilt from the jobs directory after a restart. See [`store::JobStore`].
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub use store::{CleanupReport, JobStore, JobStoreConfig, LoadReport, SkippedRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The allowed transition table. Everything not listed is rejected.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Queued, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One unit of extraction work. `params` is opaque to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    fn new(params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            params,
            result_path: None,
            error: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id}: failed to encode record: {source}")]
    Encode {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("job {id}: failed to persist record at {}: {source}", path.display())]
    Persist {
        id: Uuid,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("jobs directory {} is unusable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
