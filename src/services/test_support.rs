//! Shared fixtures for service tests: an in-memory SQLite pool with the
//! schema applied, and a per-test scratch directory for payloads.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub async fn test_pool() -> Arc<SqlitePool> {
    // a single connection keeps the whole test on one in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    for stmt in MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&pool).await.expect("migration");
    }

    Arc::new(pool)
}

pub async fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fieldsync-test-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.expect("scratch dir");
    dir
}
