//! Defines routes for the field-data sync API.
//!
//! ## Structure
//! - **Projects**
//!   - `POST   /projects` — create project
//!   - `GET    /projects` — list projects
//!   - `GET    /projects/{id}` — project detail with storage statistics
//!   - `GET    /projects/{id}/jobs` — job listing (worker payload omitted)
//!
//! - **Project files**
//!   - `GET    /files/{projectid}` — list files (`?versions=true` groups
//!     each file with its full version history)
//!   - `PUT    /files/{projectid}/{*filename}` — upload (hash-then-store)
//!   - `GET    /files/{projectid}/{*filename}` — download latest version
//!   - `DELETE /files/{projectid}/{*filename}` — delete all versions
//!
//! - **Jobs**
//!   - `POST   /jobs` — admission check + creation
//!   - `GET    /jobs/{id}` — single-job view
//!   - `PATCH  /jobs/{id}/status` — worker lifecycle callback
//!
//! - **Deltas**
//!   - `POST   /deltas/{projectid}` — submit a deltafile
//!   - `GET    /deltas/{projectid}` — list deltas
//!   - `GET    /deltas/{projectid}/{deltafileid}` — deltas of a deltafile
//!   - `POST   /deltas/{projectid}/apply` — re-trigger application
//!   - `PATCH  /deltas/{projectid}/{deltaid}/status` — worker callback
//!
//! - **Packages**
//!   - `PUT    /packages/{projectid}/{*filename}` — worker pushes output
//!   - `GET    /packages/{projectid}/files` — packaged file set + digests
//!
//! The wildcard `*filename` allows nested paths like `layers/points.gpkg`.

use crate::{
    handlers::{
        delta_handlers::{
            apply_deltas, list_deltas, list_deltas_by_deltafile, submit_deltafile,
            update_delta_status,
        },
        file_handlers::{delete_file, download_file, list_files, upload_file},
        health_handlers::{healthz, readyz},
        job_handlers::{create_job, get_job, list_project_jobs, update_job_status},
        package_handlers::{list_package_files, upload_package_file},
        project_handlers::{create_project, get_project, list_projects},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, patch, post, put},
};

/// Build and return the router for all API routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // projects
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/{id}", get(get_project))
        .route("/projects/{id}/jobs", get(list_project_jobs))
        // project files
        .route("/files/{projectid}", get(list_files))
        .route(
            "/files/{projectid}/{*filename}",
            put(upload_file).get(download_file).delete(delete_file),
        )
        // jobs
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/status", patch(update_job_status))
        // deltas
        .route("/deltas/{projectid}", post(submit_deltafile).get(list_deltas))
        .route("/deltas/{projectid}/apply", post(apply_deltas))
        .route("/deltas/{projectid}/{id}", get(list_deltas_by_deltafile))
        .route("/deltas/{projectid}/{id}/status", patch(update_delta_status))
        // packages
        .route("/packages/{projectid}/files", get(list_package_files))
        .route("/packages/{projectid}/{*filename}", put(upload_package_file))
}
