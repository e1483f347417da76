//! Represents a single offline edit queued for replay onto a project.
//!
//! Delta statuses are set exclusively by the external apply worker. This
//! module owns the closed status taxonomy and its client presentation:
//! any raw value outside the taxonomy renders as `STATUS_ERROR`, so
//! clients never see an unrecognized status string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The closed set of delta outcomes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaStatus {
    Pending,
    Started,
    Applied,
    Conflict,
    NotApplied,
    Error,
    Ignored,
    Unpermitted,
}

impl DeltaStatus {
    /// Stable lowercase name, matching the stored TEXT value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaStatus::Pending => "pending",
            DeltaStatus::Started => "started",
            DeltaStatus::Applied => "applied",
            DeltaStatus::Conflict => "conflict",
            DeltaStatus::NotApplied => "not_applied",
            DeltaStatus::Error => "error",
            DeltaStatus::Ignored => "ignored",
            DeltaStatus::Unpermitted => "unpermitted",
        }
    }

    /// Map a raw stored value into the taxonomy. Values outside the closed
    /// set degrade to `Error` instead of passing through unmapped.
    pub fn from_raw(raw: &str) -> DeltaStatus {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => DeltaStatus::Pending,
            "started" => DeltaStatus::Started,
            "applied" => DeltaStatus::Applied,
            "conflict" => DeltaStatus::Conflict,
            "not_applied" => DeltaStatus::NotApplied,
            "error" => DeltaStatus::Error,
            "ignored" => DeltaStatus::Ignored,
            "unpermitted" => DeltaStatus::Unpermitted,
            _ => DeltaStatus::Error,
        }
    }

    /// Presentation string shown to clients.
    pub fn client_status(&self) -> &'static str {
        match self {
            DeltaStatus::Pending => "STATUS_PENDING",
            DeltaStatus::Started => "STATUS_BUSY",
            DeltaStatus::Applied => "STATUS_APPLIED",
            DeltaStatus::Conflict => "STATUS_CONFLICT",
            DeltaStatus::NotApplied => "STATUS_NOT_APPLIED",
            DeltaStatus::Error => "STATUS_ERROR",
            DeltaStatus::Ignored => "STATUS_IGNORED",
            DeltaStatus::Unpermitted => "STATUS_UNPERMITTED",
        }
    }
}

/// A delta row. `last_status` keeps whatever text the worker reported;
/// out-of-taxonomy values are degraded only at presentation time so the
/// raw diagnostic is never destroyed.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Delta {
    pub id: Uuid,

    /// Groups the deltas submitted together in one deltafile.
    pub deltafile_id: Uuid,

    pub project_id: Uuid,
    pub created_by: String,

    /// The edit payload, opaque JSON text.
    pub content: String,

    pub last_status: String,

    /// Diagnostic detail for non-applied outcomes.
    pub last_feedback: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client serialization of a delta.
#[derive(Serialize, Debug)]
pub struct DeltaResponse {
    pub id: Uuid,
    pub deltafile_id: Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: &'static str,
    pub last_status: String,
    pub output: Option<String>,
    pub content: serde_json::Value,
}

impl Delta {
    pub fn status(&self) -> DeltaStatus {
        DeltaStatus::from_raw(&self.last_status)
    }

    pub fn response(&self) -> DeltaResponse {
        let content =
            serde_json::from_str(&self.content).unwrap_or(serde_json::Value::Null);

        DeltaResponse {
            id: self.id,
            deltafile_id: self.deltafile_id,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: self.status().client_status(),
            last_status: self.last_status.clone(),
            output: self.last_feedback.clone(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn each_defined_status_has_a_distinct_presentation() {
        let all = [
            DeltaStatus::Pending,
            DeltaStatus::Started,
            DeltaStatus::Applied,
            DeltaStatus::Conflict,
            DeltaStatus::NotApplied,
            DeltaStatus::Error,
            DeltaStatus::Ignored,
            DeltaStatus::Unpermitted,
        ];

        let presentations: HashSet<_> = all.iter().map(|s| s.client_status()).collect();
        assert_eq!(presentations.len(), all.len());

        for status in all {
            assert_eq!(DeltaStatus::from_raw(status.as_str()), status);
        }
    }

    #[test]
    fn out_of_taxonomy_values_degrade_to_error() {
        for raw in ["", "bogus", "APPLIED_MAYBE", "0", "finished"] {
            assert_eq!(DeltaStatus::from_raw(raw), DeltaStatus::Error);
            assert_eq!(DeltaStatus::from_raw(raw).client_status(), "STATUS_ERROR");
        }
    }

    #[test]
    fn taxonomy_match_is_case_insensitive() {
        assert_eq!(DeltaStatus::from_raw("Applied"), DeltaStatus::Applied);
        assert_eq!(DeltaStatus::from_raw("NOT_APPLIED"), DeltaStatus::NotApplied);
    }
}
