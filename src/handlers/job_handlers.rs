//! HTTP handlers for job creation, inspection, and worker callbacks.

use crate::{
    errors::AppError,
    models::job::{JobStatus, JobSummary, JobType},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub created_by: Option<String>,
}

/// Worker callback body for `PATCH /jobs/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateJobStatusRequest {
    pub status: JobStatus,
    pub feedback: Option<serde_json::Value>,
    pub output: Option<String>,
}

/// `POST /jobs` — admission check and creation as one atomic step.
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.projects.get_project(req.project_id).await?;
    let created_by = req.created_by.as_deref().unwrap_or("anonymous");

    let job = state
        .jobs
        .create_job(&project, created_by, req.job_type)
        .await?;

    Ok((StatusCode::CREATED, Json(job.summary())))
}

/// `GET /jobs/{id}` — single-job view including the worker payload.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.jobs.get_job(id).await?;
    Ok(Json(job.detail()))
}

/// `GET /projects/{id}/jobs` — listing view, worker payload omitted.
pub async fn list_project_jobs(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<JobSummary>>, AppError> {
    state.projects.get_project(project_id).await?;
    let jobs = state.jobs.list_jobs(project_id).await?;
    Ok(Json(jobs.iter().map(|job| job.summary()).collect()))
}

/// `PATCH /jobs/{id}/status` — the worker/dispatcher advances the
/// lifecycle; invalid edges are rejected.
pub async fn update_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateJobStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let feedback = req.feedback.as_ref().map(|value| value.to_string());
    let job = state
        .jobs
        .update_status(id, req.status, feedback, req.output)
        .await?;

    if job.job_type == JobType::Package && job.status == JobStatus::Finished {
        state.projects.mark_packaged(job.project_id).await?;
    }

    Ok(Json(job.detail()))
}
