//! Represents a background job operating on a project.
//!
//! Jobs move through a fixed lifecycle driven by the external worker:
//! `pending -> queued -> started -> {finished | failed | stopped}`. The
//! service only validates that a requested transition follows these edges;
//! it never advances jobs on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// The kind of work a job performs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobType {
    /// Convert the desktop GIS project into a mobile-ready bundle.
    Package,
    /// Replay queued offline deltas onto the canonical project.
    Apply,
    /// Extract metadata from the GIS project file.
    ProcessProjectfile,
    /// Untyped job, used by maintenance tasks.
    Generic,
}

/// Internal job status. Stored as TEXT.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Started,
    Finished,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Stable lowercase name, matching the stored TEXT value.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    /// Whether a job in this status blocks admission of new jobs.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Started
        )
    }

    /// Terminal statuses are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped
        )
    }

    /// Validate a lifecycle edge. Transitions are monotonic; no status is
    /// ever revisited.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Started)
                | (JobStatus::Started, JobStatus::Finished)
                | (JobStatus::Started, JobStatus::Failed)
                | (JobStatus::Started, JobStatus::Stopped)
        )
    }

    /// Coarse status presented to polling clients, which do not care about
    /// the queued/started/stopped distinction.
    pub fn client_status(&self) -> &'static str {
        match self {
            JobStatus::Pending => "STATUS_PENDING",
            JobStatus::Queued | JobStatus::Started | JobStatus::Stopped => "STATUS_BUSY",
            JobStatus::Finished => "STATUS_FINISHED",
            JobStatus::Failed => "STATUS_ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background job row.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Job {
    pub id: Uuid,

    /// Owning project.
    pub project_id: Uuid,

    /// Account that requested the job.
    pub created_by: String,

    #[sqlx(rename = "job_type")]
    #[serde(rename = "type")]
    pub job_type: JobType,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Worker-reported step log, JSON text. Meaningful once the job has
    /// left `started`.
    pub feedback: Option<String>,

    /// Human-readable worker log.
    pub output: Option<String>,
}

/// Listing serialization: omits `feedback` and `output` entirely to keep
/// list responses small.
#[derive(Serialize, Debug)]
pub struct JobSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub created_by: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub client_status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Single-job serialization: includes the worker payload, with `feedback`
/// parsed back into structured JSON.
#[derive(Serialize, Debug)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub feedback: Option<serde_json::Value>,
    pub output: Option<String>,
}

impl Job {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            project_id: self.project_id,
            created_by: self.created_by.clone(),
            job_type: self.job_type,
            status: self.status,
            client_status: self.status.client_status(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn detail(&self) -> JobDetail {
        let feedback = self
            .feedback
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        JobDetail {
            summary: self.summary(),
            feedback,
            output: self.output.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges_are_monotonic() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Started));
        assert!(JobStatus::Started.can_transition_to(JobStatus::Finished));
        assert!(JobStatus::Started.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Started.can_transition_to(JobStatus::Stopped));

        // no skips, no reversals, no exits from terminal statuses
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Started));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Started.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Finished.can_transition_to(JobStatus::Started));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Stopped.can_transition_to(JobStatus::Finished));
    }

    #[test]
    fn client_status_collapses_busy_states() {
        assert_eq!(JobStatus::Pending.client_status(), "STATUS_PENDING");
        assert_eq!(JobStatus::Queued.client_status(), "STATUS_BUSY");
        assert_eq!(JobStatus::Started.client_status(), "STATUS_BUSY");
        assert_eq!(JobStatus::Stopped.client_status(), "STATUS_BUSY");
        assert_eq!(JobStatus::Finished.client_status(), "STATUS_FINISHED");
        assert_eq!(JobStatus::Failed.client_status(), "STATUS_ERROR");
    }

    #[test]
    fn active_and_terminal_partition_the_status_set() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Started,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Stopped,
        ] {
            assert_ne!(status.is_active(), status.is_terminal());
        }
    }
}
