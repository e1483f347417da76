//! HTTP handlers for packaged (export) files.
//!
//! The packaging worker pushes its output under the project's export
//! prefix; clients list it with each file's stored digest so downloads
//! can be integrity-checked.

use crate::{
    errors::AppError,
    handlers::file_handlers::spool_and_put,
    services::storage_service::{StorageService, safe_join},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{StreamExt, pin_mut};
use serde_json::json;
use uuid::Uuid;

/// `PUT /packages/{projectid}/{*filename}` — the packaging worker
/// uploads one packaged file.
pub async fn upload_package_file(
    State(state): State<AppState>,
    Path((project_id, filename)): Path<(Uuid, String)>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    state.projects.get_project(project_id).await?;

    let prefix = StorageService::project_export_prefix(project_id);
    let key = safe_join(&prefix, &[filename.as_str()])?;
    let (object, sha256) = spool_and_put(&state, &key, body).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": filename,
            "key": object.key,
            "size": object.size,
            "sha256": sha256,
        })),
    ))
}

/// `GET /packages/{projectid}/files` — list the packaged file set with
/// stored digests and URLs.
pub async fn list_package_files(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.projects.get_project(project_id).await?;

    let prefix = StorageService::project_export_prefix(project_id);
    let objects = {
        let stream = state.storage.list(&prefix, true);
        pin_mut!(stream);
        let mut objects = Vec::new();
        while let Some(object) = stream.next().await {
            objects.push(object?);
        }
        objects
    };

    let mut files = Vec::with_capacity(objects.len());
    for object in objects {
        let sha256 = state.storage.head_digest(&object.key).await?;
        files.push(json!({
            "name": object.name,
            "key": object.key,
            "size": object.size,
            "last_modified": object.last_modified,
            "etag": object.etag,
            "sha256": sha256,
            "url": state.storage.object_url(&object.key),
        }));
    }

    Ok(Json(json!({ "count": files.len(), "files": files })))
}
