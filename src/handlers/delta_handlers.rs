//! HTTP handlers for deltafile submission, delta listings, and the
//! apply-worker callbacks.

use crate::{
    errors::AppError,
    models::delta::DeltaResponse,
    models::job::JobType,
    models::project::Project,
    services::delta_service::{Deltafile, SubmitOutcome},
    services::job_service::JobError,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

/// Worker callback body for `PATCH /deltas/{projectid}/{deltaid}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateDeltaStatusRequest {
    pub status: String,
    pub feedback: Option<String>,
}

/// Request an apply job; an admission denial only means a job is already
/// running, so it is logged rather than failing the submission.
async fn request_apply_job(state: &AppState, project: &Project, created_by: &str) {
    match state
        .jobs
        .create_job(project, created_by, JobType::Apply)
        .await
    {
        Ok(_) => {}
        Err(JobError::AdmissionDenied(_)) => {
            warn!(project_id = %project.id, "failed to start delta apply job");
        }
        Err(err) => {
            warn!(project_id = %project.id, "delta apply job creation failed: {err}");
        }
    }
}

/// `POST /deltas/{projectid}` — ingest a deltafile, then queue an apply.
pub async fn submit_deltafile(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(deltafile): Json<Deltafile>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.projects.get_project(project_id).await?;

    let outcome = state
        .deltas
        .submit_deltafile(&project, "anonymous", &deltafile)
        .await?;

    request_apply_job(&state, &project, "anonymous").await;

    let (status, body) = match outcome {
        SubmitOutcome::Created(count) => (
            StatusCode::CREATED,
            json!({ "outcome": "created", "deltas": count }),
        ),
        SubmitOutcome::Resubmitted => {
            (StatusCode::OK, json!({ "outcome": "resubmitted" }))
        }
    };
    Ok((status, Json(body)))
}

/// `GET /deltas/{projectid}` — all deltas of a project.
pub async fn list_deltas(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<DeltaResponse>>, AppError> {
    state.projects.get_project(project_id).await?;
    let deltas = state.deltas.list_deltas(project_id).await?;
    Ok(Json(deltas.iter().map(|d| d.response()).collect()))
}

/// `GET /deltas/{projectid}/{deltafileid}` — deltas of one deltafile.
pub async fn list_deltas_by_deltafile(
    State(state): State<AppState>,
    Path((project_id, deltafile_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<DeltaResponse>>, AppError> {
    state.projects.get_project(project_id).await?;
    let deltas = state
        .deltas
        .list_deltas_by_deltafile(project_id, deltafile_id)
        .await?;
    Ok(Json(deltas.iter().map(|d| d.response()).collect()))
}

/// `POST /deltas/{projectid}/apply` — re-trigger delta application.
pub async fn apply_deltas(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.projects.get_project(project_id).await?;
    if project.project_filename.is_none() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "no_project_file",
            "project has no recognized GIS project file",
        ));
    }

    request_apply_job(&state, &project, "anonymous").await;
    Ok(StatusCode::OK)
}

/// `PATCH /deltas/{projectid}/{deltaid}/status` — the apply worker
/// reports one delta's outcome.
pub async fn update_delta_status(
    State(state): State<AppState>,
    Path((project_id, delta_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateDeltaStatusRequest>,
) -> Result<Json<DeltaResponse>, AppError> {
    state.projects.get_project(project_id).await?;
    let delta = state
        .deltas
        .record_outcome(project_id, delta_id, &req.status, req.feedback)
        .await?;
    Ok(Json(delta.response()))
}
