//! Represents a geospatial field-data project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A project groups the files of one desktop GIS project together with the
/// jobs and deltas operating on them.
///
/// At most one uploaded file is recognized as the GIS project file (by its
/// extension); `project_filename` stores its path relative to the project's
/// files prefix, or `None` if no such file has been uploaded yet.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Project {
    /// Unique identifier for this project.
    pub id: Uuid,

    /// Display name.
    pub name: String,

    /// Owning account.
    pub owner: String,

    /// Whether the project is publicly visible.
    pub is_public: bool,

    /// Relative path of the recognized GIS project file, if any.
    pub project_filename: Option<String>,

    /// When this project was created.
    pub created_at: DateTime<Utc>,

    /// When this project row was last modified.
    pub updated_at: DateTime<Utc>,

    /// When the project data was last packaged for field use.
    pub data_last_packaged_at: Option<DateTime<Utc>>,

    /// When any project file was last uploaded or deleted.
    pub data_last_updated_at: Option<DateTime<Utc>>,
}
