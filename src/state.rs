//! Shared application state carried by the router.
//!
//! Services are injected explicitly; nothing in the crate holds a
//! module-level store handle.

use crate::services::{
    delta_service::DeltaService, job_service::JobService, project_service::ProjectService,
    storage_service::StorageService,
};

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub projects: ProjectService,
    pub jobs: JobService,
    pub deltas: DeltaService,
}
