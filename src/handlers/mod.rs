pub mod delta_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod job_handlers;
pub mod package_handlers;
pub mod project_handlers;
