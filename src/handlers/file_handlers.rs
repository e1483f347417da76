//! HTTP handlers for project file upload, download, listing, and delete.
//!
//! Uploads spool the body to disk first so the content digest can be
//! computed before the object is stored; the spooled handle is rewound
//! by the hasher and streamed straight into the store. Storage concerns
//! stay in `StorageService`.

use crate::{
    errors::AppError,
    services::{
        digest,
        storage_service::{StorageService, is_project_file, safe_join},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, pin_mut};
use serde::Deserialize;
use serde_json::json;
use std::io::SeekFrom;
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Query params accepted by the file listing.
#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    /// When set, group each file with its full version history.
    #[serde(default)]
    pub versions: bool,
}

/// Spool a request body to disk, hash it, and store it under `key`.
/// Returns the stored object and its content digest.
pub(crate) async fn spool_and_put(
    state: &AppState,
    key: &str,
    body: Body,
) -> Result<(crate::models::object::StoredObject, String), AppError> {
    let spool_dir = state.storage.spool_dir();
    fs::create_dir_all(&spool_dir).await?;
    let spool_path = spool_dir.join(format!("upload-{}", Uuid::new_v4()));

    let result = async {
        // opened read+write: written first, then re-read for hashing and
        // the store upload
        let mut spool = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&spool_path)
            .await?;
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                AppError::new(StatusCode::BAD_REQUEST, "upload_failed", err.to_string())
            })?;
            spool.write_all(&chunk).await?;
        }
        spool.flush().await?;

        // the handle sits at EOF after writing; hash from the start. The
        // hasher rewinds again afterwards, leaving it ready for the upload.
        spool.seek(SeekFrom::Start(0)).await?;
        let sha256 = digest::file_sha256(&mut spool).await?;
        let object = state
            .storage
            .put_object(key, ReaderStream::new(spool), &sha256)
            .await?;
        Ok((object, sha256))
    }
    .await;

    let _ = fs::remove_file(&spool_path).await;
    result
}

/// Upload a project source file to `PUT /files/{projectid}/{*filename}`.
pub async fn upload_file(
    State(state): State<AppState>,
    Path((project_id, filename)): Path<(Uuid, String)>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let project = state.projects.get_project(project_id).await?;

    let prefix = StorageService::project_files_prefix(project_id);
    let key = safe_join(&prefix, &[filename.as_str()])?;
    let (object, sha256) = spool_and_put(&state, &key, body).await?;

    // first recognized GIS project file wins
    if project.project_filename.is_none() && is_project_file(&filename) {
        state
            .projects
            .set_project_filename(project_id, Some(&filename))
            .await?;
    }
    state.projects.touch_data_updated(project_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": filename,
            "key": object.key,
            "size": object.size,
            "sha256": sha256,
            "url": state.storage.object_url(&object.key),
        })),
    ))
}

/// Download the latest version of a file as a streaming response.
pub async fn download_file(
    State(state): State<AppState>,
    Path((project_id, filename)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let prefix = StorageService::project_files_prefix(project_id);
    let key = safe_join(&prefix, &[filename.as_str()])?;

    let sha256 = state.storage.head_digest(&key).await?;
    let (meta, file) = state.storage.open_object(&key).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Some(digest) = sha256 {
        if let Ok(value) = HeaderValue::from_str(&digest) {
            headers.insert(HeaderName::from_static("x-sha256sum"), value);
        }
    }

    Ok(response)
}

/// List a project's files: `GET /files/{projectid}?versions=true`.
pub async fn list_files(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.projects.get_project(project_id).await?;

    if query.versions {
        let groups = state.storage.list_files_with_versions(project_id).await?;
        return Ok(Json(json!({ "files": groups })));
    }

    let prefix = StorageService::project_files_prefix(project_id);
    let stream = state.storage.list(&prefix, true);
    pin_mut!(stream);

    let mut files = Vec::new();
    while let Some(object) = stream.next().await {
        let object = object?;
        files.push(json!({
            "name": object.name,
            "key": object.key,
            "size": object.size,
            "last_modified": object.last_modified,
            "etag": object.etag,
            "url": state.storage.object_url(&object.key),
        }));
    }

    Ok(Json(json!({ "files": files })))
}

/// Remove every version of a file.
pub async fn delete_file(
    State(state): State<AppState>,
    Path((project_id, filename)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.projects.get_project(project_id).await?;

    let prefix = StorageService::project_files_prefix(project_id);
    let key = safe_join(&prefix, &[filename.as_str()])?;
    state.storage.delete_object(&key).await?;

    // deleting the recognized project file re-runs recognition
    if project.project_filename.as_deref() == Some(filename.as_str()) {
        let replacement = state.storage.project_file(project_id).await?;
        state
            .projects
            .set_project_filename(project_id, replacement.as_deref())
            .await?;
    }
    state.projects.touch_data_updated(project_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        delta_service::DeltaService, job_service::JobService, project_service::ProjectService,
        test_support::{scratch_dir, test_pool},
    };

    async fn app_state() -> AppState {
        let pool = test_pool().await;
        AppState {
            storage: StorageService::new(
                pool.clone(),
                scratch_dir().await,
                "fieldsync",
                "http://storage.local:9000",
            ),
            projects: ProjectService::new(pool.clone()),
            jobs: JobService::new(pool.clone()),
            deltas: DeltaService::new(pool),
        }
    }

    #[tokio::test]
    async fn spooled_upload_stores_the_digest_of_the_payload() {
        let state = app_state().await;
        let payload: &[u8] = b"field data";
        let expected = digest::bytes_sha256(payload);
        let empty_input = digest::bytes_sha256(b"");

        let (object, sha256) = spool_and_put(
            &state,
            "projects/p/files/points.geojson",
            Body::from(payload),
        )
        .await
        .unwrap();

        // the digest of the full payload, not of whatever is left at the
        // spool handle's write position
        assert_eq!(sha256, expected);
        assert_ne!(sha256, empty_input);
        assert_eq!(object.size, payload.len() as i64);

        let stored = state
            .storage
            .head_digest("projects/p/files/points.geojson")
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some(expected.as_str()));
    }
}
