//! Delta ingestion and outcome recording.
//!
//! A deltafile is a batch of offline edits submitted together. Ingestion
//! is idempotent for identical resubmissions, rejects a deltafile id
//! reused with different deltas, and inserts the batch as `pending` in a
//! single transaction. Outcomes are reported by the external apply
//! worker; the raw status text is stored verbatim and degraded to the
//! closed taxonomy only at presentation.

use crate::models::delta::{Delta, DeltaStatus};
use crate::models::project::Project;
use chrono::Utc;
use serde::Deserialize;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("deltafile `{0}` was already submitted with different deltas")]
    DeltafileDuplication(Uuid),
    #[error("project has no recognized GIS project file")]
    NoProjectFile,
    #[error("deltafile project `{deltafile}` does not match project `{project}`")]
    ProjectMismatch { deltafile: Uuid, project: Uuid },
    #[error("invalid deltafile: {0}")]
    InvalidDeltafile(String),
    #[error("delta `{0}` not found")]
    DeltaNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DeltaResult<T> = Result<T, DeltaError>;

/// Wire shape of a submitted deltafile.
#[derive(Debug, Deserialize)]
pub struct Deltafile {
    pub id: Uuid,
    pub project: Uuid,
    #[serde(default)]
    pub deltas: Vec<serde_json::Value>,
}

/// Outcome of a deltafile submission.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Deltas were inserted as pending.
    Created(usize),
    /// The identical deltafile was submitted before; nothing to do.
    Resubmitted,
}

#[derive(Clone)]
pub struct DeltaService {
    pub db: Arc<SqlitePool>,
}

impl DeltaService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Ingest a deltafile for `project`.
    pub async fn submit_deltafile(
        &self,
        project: &Project,
        created_by: &str,
        deltafile: &Deltafile,
    ) -> DeltaResult<SubmitOutcome> {
        if deltafile.project != project.id {
            return Err(DeltaError::ProjectMismatch {
                deltafile: deltafile.project,
                project: project.id,
            });
        }

        let mut delta_ids = Vec::with_capacity(deltafile.deltas.len());
        for delta in &deltafile.deltas {
            let uuid = delta
                .get("uuid")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| {
                    DeltaError::InvalidDeltafile("delta without a valid uuid".to_string())
                })?;
            delta_ids.push(uuid);
        }

        // existence check and insert share one transaction, so a
        // concurrent identical submission cannot slip between them
        let mut tx = self.db.begin().await?;

        let existing = Self::existing_delta_ids(&mut *tx, deltafile.id).await?;
        if !existing.is_empty() {
            return Self::classify_resubmission(deltafile.id, &delta_ids, existing);
        }

        if project.project_filename.is_none() {
            return Err(DeltaError::NoProjectFile);
        }

        let now = Utc::now();
        for (delta, id) in deltafile.deltas.iter().zip(&delta_ids) {
            let content = serde_json::to_string(delta)
                .map_err(|err| DeltaError::InvalidDeltafile(err.to_string()))?;

            let result = sqlx::query(
                "INSERT INTO deltas (id, deltafile_id, project_id, created_by, content,
                 last_status, last_feedback, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
            )
            .bind(id)
            .bind(deltafile.id)
            .bind(project.id)
            .bind(created_by)
            .bind(content)
            .bind(DeltaStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                // a concurrent submission of the same deltas won the race;
                // classify against what actually landed
                Err(err) if is_unique_violation(&err) => {
                    drop(tx);
                    let existing =
                        Self::existing_delta_ids(&*self.db, deltafile.id).await?;
                    return Self::classify_resubmission(deltafile.id, &delta_ids, existing);
                }
                Err(err) => return Err(err.into()),
            }
        }
        tx.commit().await?;

        Ok(SubmitOutcome::Created(delta_ids.len()))
    }

    async fn existing_delta_ids<'e, E>(
        executor: E,
        deltafile_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        Ok(
            sqlx::query_as::<_, (Uuid,)>("SELECT id FROM deltas WHERE deltafile_id = ?")
                .bind(deltafile_id)
                .fetch_all(executor)
                .await?
                .into_iter()
                .map(|(id,)| id)
                .collect(),
        )
    }

    /// An identical delta set is an idempotent resubmission; a different
    /// one reusing the deltafile id is a duplication error.
    fn classify_resubmission(
        deltafile_id: Uuid,
        submitted: &[Uuid],
        mut existing: Vec<Uuid>,
    ) -> DeltaResult<SubmitOutcome> {
        let mut submitted = submitted.to_vec();
        submitted.sort();
        existing.sort();
        if submitted == existing {
            Ok(SubmitOutcome::Resubmitted)
        } else {
            Err(DeltaError::DeltafileDuplication(deltafile_id))
        }
    }

    /// Store the worker-reported outcome for one delta. The raw status is
    /// kept as sent; presentation maps unknown values to ERROR.
    ///
    /// The update is scoped to `project_id`, so a delta id belonging to a
    /// different project reads as not found rather than being mutated.
    pub async fn record_outcome(
        &self,
        project_id: Uuid,
        delta_id: Uuid,
        raw_status: &str,
        feedback: Option<String>,
    ) -> DeltaResult<Delta> {
        let result = sqlx::query(
            "UPDATE deltas SET last_status = ?, last_feedback = ?, updated_at = ?
             WHERE id = ? AND project_id = ?",
        )
        .bind(raw_status)
        .bind(feedback)
        .bind(Utc::now())
        .bind(delta_id)
        .bind(project_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeltaError::DeltaNotFound(delta_id));
        }
        self.get_delta(delta_id).await
    }

    pub async fn get_delta(&self, id: Uuid) -> DeltaResult<Delta> {
        sqlx::query_as::<_, Delta>("SELECT * FROM deltas WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(DeltaError::DeltaNotFound(id))
    }

    pub async fn list_deltas(&self, project_id: Uuid) -> DeltaResult<Vec<Delta>> {
        Ok(sqlx::query_as::<_, Delta>(
            "SELECT * FROM deltas WHERE project_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(&*self.db)
        .await?)
    }

    pub async fn list_deltas_by_deltafile(
        &self,
        project_id: Uuid,
        deltafile_id: Uuid,
    ) -> DeltaResult<Vec<Delta>> {
        Ok(sqlx::query_as::<_, Delta>(
            "SELECT * FROM deltas WHERE project_id = ? AND deltafile_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .bind(deltafile_id)
        .fetch_all(&*self.db)
        .await?)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
