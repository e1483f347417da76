//! Field-data synchronization server.
//!
//! Clients edit geospatial projects offline and resynchronize through
//! this service: project files are kept with full version history in a
//! content-addressed store, packaging/apply work runs as per-project
//! exclusive jobs, and offline edits arrive as deltafiles whose per-edit
//! outcomes follow a closed status taxonomy.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
