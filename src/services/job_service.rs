//! Job admission and lifecycle.
//!
//! Admission enforces whole-project exclusivity: at most one active job
//! per project at any time, regardless of type, because concurrent
//! packaging and apply operations could race on the same underlying
//! files. The admission scan and the insert run as one atomic unit — an
//! in-process admission lock serializes scan-then-insert, which itself
//! executes inside a single database transaction.

use crate::models::job::{Job, JobStatus, JobType};
use crate::models::project::Project;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Machine-readable admission denial reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Another job for this project is pending, queued, or started.
    ActiveJobExists,
    /// Package jobs require a recognized GIS project file.
    NoProjectFile,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::ActiveJobExists => "active_job_exists",
            DenyReason::NoProjectFile => "no_project_file",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job admission denied: {}", .0.code())]
    AdmissionDenied(DenyReason),
    #[error("invalid job transition from `{from}` to `{to}`")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("job `{0}` not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Clone)]
pub struct JobService {
    pub db: Arc<SqlitePool>,

    /// Serializes the admission scan-then-insert sequence.
    admission: Arc<Mutex<()>>,
}

const ACTIVE_JOB_SQL: &str = "SELECT * FROM jobs
     WHERE project_id = ? AND status IN ('pending', 'queued', 'started')
     ORDER BY started_at DESC, created_at DESC
     LIMIT 1";

impl JobService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            admission: Arc::new(Mutex::new(())),
        }
    }

    /// The job currently blocking admission for a project, if any.
    /// Reporting picks the one with the latest start, then creation time.
    pub async fn active_job(&self, project_id: Uuid) -> JobResult<Option<Job>> {
        Ok(Self::fetch_active(&*self.db, project_id).await?)
    }

    async fn fetch_active<'e, E>(executor: E, project_id: Uuid) -> Result<Option<Job>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Job>(ACTIVE_JOB_SQL)
            .bind(project_id)
            .fetch_optional(executor)
            .await
    }

    /// Decide whether a new job of `job_type` may be created for the
    /// project. Advisory on its own; [`create_job`](Self::create_job)
    /// re-evaluates the same rules atomically with the insert.
    pub async fn may_create(&self, project: &Project, job_type: JobType) -> JobResult<()> {
        Self::check_admission(project, job_type)?;
        if Self::fetch_active(&*self.db, project.id).await?.is_some() {
            return Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists));
        }
        Ok(())
    }

    /// Type-specific preconditions, checked only at admission time.
    fn check_admission(project: &Project, job_type: JobType) -> JobResult<()> {
        if job_type == JobType::Package && project.project_filename.is_none() {
            return Err(JobError::AdmissionDenied(DenyReason::NoProjectFile));
        }
        Ok(())
    }

    /// Admit and create a job in one atomic step. Under concurrent
    /// requests for the same project at most one creation succeeds.
    pub async fn create_job(
        &self,
        project: &Project,
        created_by: &str,
        job_type: JobType,
    ) -> JobResult<Job> {
        Self::check_admission(project, job_type)?;

        let _guard = self.admission.lock().await;
        let mut tx = self.db.begin().await?;

        if Self::fetch_active(&mut *tx, project.id).await?.is_some() {
            return Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            project_id: project.id,
            created_by: created_by.to_string(),
            job_type,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            feedback: None,
            output: None,
        };

        sqlx::query(
            "INSERT INTO jobs (id, project_id, created_by, job_type, status,
             created_at, updated_at, started_at, finished_at, feedback, output)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL)",
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(&job.created_by)
        .bind(job.job_type)
        .bind(job.status)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> JobResult<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(JobError::JobNotFound(id))
    }

    pub async fn list_jobs(&self, project_id: Uuid) -> JobResult<Vec<Job>> {
        Ok(sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Advance a job along its lifecycle, stamping start/finish times and
    /// storing the worker-reported payload.
    ///
    /// The UPDATE carries a compare-and-set guard on the current status,
    /// so a transition raced by another writer fails rather than
    /// clobbering it.
    pub async fn update_status(
        &self,
        id: Uuid,
        next: JobStatus,
        feedback: Option<String>,
        output: Option<String>,
    ) -> JobResult<Job> {
        let job = self.get_job(id).await?;
        if !job.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }

        let now = Utc::now();
        let started_at = match next {
            JobStatus::Started => Some(now),
            _ => job.started_at,
        };
        let finished_at = if next.is_terminal() { Some(now) } else { None };

        let result = sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ?, started_at = ?, finished_at = ?,
             feedback = COALESCE(?, feedback), output = COALESCE(?, output)
             WHERE id = ? AND status = ?",
        )
        .bind(next)
        .bind(now)
        .bind(started_at)
        .bind(finished_at)
        .bind(feedback)
        .bind(output)
        .bind(id)
        .bind(job.status)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            // lost a race with another writer
            let current = self.get_job(id).await?;
            return Err(JobError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        self.get_job(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::project_service::ProjectService;
    use crate::services::test_support::test_pool;
    use sqlx::SqlitePool;

    async fn fixtures() -> (Arc<SqlitePool>, ProjectService, JobService) {
        let pool = test_pool().await;
        (
            pool.clone(),
            ProjectService::new(pool.clone()),
            JobService::new(pool),
        )
    }

    async fn project_with_file(projects: &ProjectService) -> Project {
        let project = projects.create_project("survey", "ana", false).await.unwrap();
        projects
            .set_project_filename(project.id, Some("project.qgs"))
            .await
            .unwrap();
        projects.get_project(project.id).await.unwrap()
    }

    #[tokio::test]
    async fn admission_blocks_while_any_job_is_active() {
        let (_pool, projects, jobs) = fixtures().await;
        let project = project_with_file(&projects).await;

        jobs.may_create(&project, JobType::Package).await.unwrap();
        let job = jobs
            .create_job(&project, "ana", JobType::Package)
            .await
            .unwrap();

        // still pending: every type is denied, whole-project lock
        for job_type in [JobType::Package, JobType::Apply, JobType::Generic] {
            assert!(matches!(
                jobs.may_create(&project, job_type).await,
                Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists))
            ));
        }
        assert!(matches!(
            jobs.create_job(&project, "ana", JobType::Apply).await,
            Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists))
        ));

        // drive to a terminal status; admission opens again
        jobs.update_status(job.id, JobStatus::Queued, None, None).await.unwrap();
        jobs.update_status(job.id, JobStatus::Started, None, None).await.unwrap();
        jobs.update_status(job.id, JobStatus::Finished, None, None).await.unwrap();

        jobs.may_create(&project, JobType::Apply).await.unwrap();
    }

    #[tokio::test]
    async fn package_admission_requires_a_project_file() {
        let (_pool, projects, jobs) = fixtures().await;
        let project = projects.create_project("bare", "ana", false).await.unwrap();

        match jobs.may_create(&project, JobType::Package).await {
            Err(JobError::AdmissionDenied(reason)) => {
                assert_eq!(reason.code(), "no_project_file");
            }
            other => panic!("expected denial, got {:?}", other.map(|_| ())),
        }

        // other types are unaffected by the precondition
        jobs.may_create(&project, JobType::Apply).await.unwrap();

        let project = project_with_file(&projects).await;
        jobs.may_create(&project, JobType::Package).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_creation_admits_exactly_one_job() {
        let (_pool, projects, jobs) = fixtures().await;
        let project = project_with_file(&projects).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let jobs = jobs.clone();
            let project = project.clone();
            handles.push(tokio::spawn(async move {
                jobs.create_job(&project, "ana", JobType::Apply).await
            }));
        }

        let mut created = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists)) => denied += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(denied, 7);
    }

    #[tokio::test]
    async fn transitions_follow_the_lifecycle_edges() {
        let (_pool, projects, jobs) = fixtures().await;
        let project = project_with_file(&projects).await;
        let job = jobs
            .create_job(&project, "ana", JobType::ProcessProjectfile)
            .await
            .unwrap();

        // skipping queued is a caller bug
        assert!(matches!(
            jobs.update_status(job.id, JobStatus::Started, None, None).await,
            Err(JobError::InvalidTransition { .. })
        ));

        jobs.update_status(job.id, JobStatus::Queued, None, None).await.unwrap();
        let started = jobs
            .update_status(job.id, JobStatus::Started, None, None)
            .await
            .unwrap();
        assert!(started.started_at.is_some());

        let finished = jobs
            .update_status(
                job.id,
                JobStatus::Failed,
                Some(r#"{"error":"layer missing"}"#.to_string()),
                Some("worker log".to_string()),
            )
            .await
            .unwrap();
        assert!(finished.finished_at.is_some());
        assert_eq!(finished.output.as_deref(), Some("worker log"));

        // terminal jobs are immutable
        assert!(matches!(
            jobs.update_status(job.id, JobStatus::Queued, None, None).await,
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn active_job_reporting_prefers_latest_start() {
        let (_pool, projects, jobs) = fixtures().await;
        let project = project_with_file(&projects).await;

        assert!(jobs.active_job(project.id).await.unwrap().is_none());

        let job = jobs
            .create_job(&project, "ana", JobType::Package)
            .await
            .unwrap();
        let active = jobs.active_job(project.id).await.unwrap().unwrap();
        assert_eq!(active.id, job.id);
    }
}
