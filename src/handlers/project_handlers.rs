//! HTTP handlers for project rows.

use crate::{errors::AppError, models::project::Project, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub is_public: bool,
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let project = state
        .projects
        .create_project(&req.name, &req.owner, req.is_public)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /projects`
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.projects.list_projects().await?))
}

/// `GET /projects/{id}` — project row plus storage statistics.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let project = state.projects.get_project(id).await?;
    let storage_size = state.storage.project_size(id).await?;
    let files_count = state
        .storage
        .files_count(&crate::services::storage_service::StorageService::project_files_prefix(id))
        .await?;

    Ok(Json(json!({
        "project": project,
        "storage_size": storage_size,
        "files_count": files_count,
    })))
}
