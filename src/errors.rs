//! HTTP-facing error type.
//!
//! Service errors carry their own taxonomy; `AppError` is the single
//! place where they are translated into an HTTP status and a JSON body
//! with a machine-readable `code`.

use crate::services::delta_service::DeltaError;
use crate::services::job_service::JobError;
use crate::services::project_service::ProjectError;
use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for request errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Shortcut for 404 Not Found.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::ObjectNotFound(_) => Self::not_found(err.to_string()),
            StorageError::PathEscape { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "path_escape", err.to_string())
            }
            StorageError::InvalidObjectKey => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_key", err.to_string())
            }
            StorageError::MissingLatestVersion(_) => {
                tracing::error!("version listing consistency violation: {err}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_consistency",
                    err.to_string(),
                )
            }
            StorageError::Sqlx(_) | StorageError::Io(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                err.to_string(),
            ),
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::AdmissionDenied(reason) => {
                Self::new(StatusCode::CONFLICT, reason.code(), err.to_string())
            }
            JobError::InvalidTransition { .. } => {
                // a caller bug, worth investigating
                tracing::error!("rejected job transition: {err}");
                Self::new(StatusCode::CONFLICT, "invalid_transition", err.to_string())
            }
            JobError::JobNotFound(_) => Self::not_found(err.to_string()),
            JobError::Sqlx(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                err.to_string(),
            ),
        }
    }
}

impl From<ProjectError> for AppError {
    fn from(err: ProjectError) -> Self {
        match &err {
            ProjectError::ProjectNotFound(_) => Self::not_found(err.to_string()),
            ProjectError::Sqlx(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                err.to_string(),
            ),
        }
    }
}

impl From<DeltaError> for AppError {
    fn from(err: DeltaError) -> Self {
        match &err {
            DeltaError::DeltafileDuplication(_) => Self::new(
                StatusCode::CONFLICT,
                "deltafile_duplication",
                err.to_string(),
            ),
            DeltaError::NoProjectFile => {
                Self::new(StatusCode::BAD_REQUEST, "no_project_file", err.to_string())
            }
            DeltaError::ProjectMismatch { .. } | DeltaError::InvalidDeltafile(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_deltafile", err.to_string())
            }
            DeltaError::DeltaNotFound(_) => Self::not_found(err.to_string()),
            DeltaError::Sqlx(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                err.to_string(),
            ),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
