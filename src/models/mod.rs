//! Core data models for the field-data synchronization service.
//!
//! These entities represent projects, their background jobs, offline edit
//! deltas, and the versioned objects kept in storage. They map cleanly to
//! database tables via `sqlx::FromRow` and serialize naturally as JSON via
//! `serde`.

pub mod delta;
pub mod job;
pub mod object;
pub mod project;
