//! Project rows: creation, lookup, and the bookkeeping fields the file
//! and job flows maintain (`project_filename`, data timestamps).

use crate::models::project::Project;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project `{0}` not found")]
    ProjectNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(Clone)]
pub struct ProjectService {
    pub db: Arc<SqlitePool>,
}

impl ProjectService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create_project(
        &self,
        name: &str,
        owner: &str,
        is_public: bool,
    ) -> ProjectResult<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner: owner.to_string(),
            is_public,
            project_filename: None,
            created_at: now,
            updated_at: now,
            data_last_packaged_at: None,
            data_last_updated_at: None,
        };

        sqlx::query(
            "INSERT INTO projects (id, name, owner, is_public, project_filename,
             created_at, updated_at, data_last_packaged_at, data_last_updated_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?, NULL, NULL)",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.owner)
        .bind(project.is_public)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&*self.db)
        .await?;

        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> ProjectResult<Project> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(ProjectError::ProjectNotFound(id))
    }

    pub async fn list_projects(&self) -> ProjectResult<Vec<Project>> {
        Ok(
            sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
                .fetch_all(&*self.db)
                .await?,
        )
    }

    /// Record (or clear) the recognized GIS project file pointer.
    pub async fn set_project_filename(
        &self,
        id: Uuid,
        filename: Option<&str>,
    ) -> ProjectResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET project_filename = ?, updated_at = ? WHERE id = ?",
        )
        .bind(filename)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::ProjectNotFound(id));
        }
        Ok(())
    }

    /// Stamp `data_last_updated_at` after an upload or delete.
    pub async fn touch_data_updated(&self, id: Uuid) -> ProjectResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE projects SET data_last_updated_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::ProjectNotFound(id));
        }
        Ok(())
    }

    /// Stamp `data_last_packaged_at` when a package job finishes.
    pub async fn mark_packaged(&self, id: Uuid) -> ProjectResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE projects SET data_last_packaged_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::ProjectNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::test_pool;

    #[tokio::test]
    async fn create_and_maintain_project_row() {
        let service = ProjectService::new(test_pool().await);

        let project = service.create_project("survey", "ana", false).await.unwrap();
        assert_eq!(project.project_filename, None);

        service
            .set_project_filename(project.id, Some("project.qgs"))
            .await
            .unwrap();
        service.touch_data_updated(project.id).await.unwrap();
        service.mark_packaged(project.id).await.unwrap();

        let fetched = service.get_project(project.id).await.unwrap();
        assert_eq!(fetched.project_filename.as_deref(), Some("project.qgs"));
        assert!(fetched.data_last_updated_at.is_some());
        assert!(fetched.data_last_packaged_at.is_some());

        assert!(matches!(
            service.get_project(Uuid::new_v4()).await,
            Err(ProjectError::ProjectNotFound(_))
        ));
    }
}
