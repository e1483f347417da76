//! End-to-end packaging scenario at the service layer: upload project
//! files, admit and run a package job, then verify the packaged file set
//! against its stored digests.

use bytes::Bytes;
use fieldsync::models::job::{JobStatus, JobType};
use fieldsync::services::digest;
use fieldsync::services::job_service::{DenyReason, JobError, JobService};
use fieldsync::services::project_service::ProjectService;
use fieldsync::services::storage_service::{StorageService, safe_join};
use futures::stream;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

struct Harness {
    storage: StorageService,
    projects: ProjectService,
    jobs: JobService,
}

async fn harness() -> Harness {
    // shared-cache keeps every pooled connection on the same in-memory
    // database, so queries can run while a listing stream is live
    let db_url = format!(
        "sqlite:file:fieldsync-e2e-{}?mode=memory&cache=shared",
        Uuid::new_v4()
    );
    let pool: SqlitePool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(2)
        .connect(&db_url)
        .await
        .expect("in-memory sqlite");
    for stmt in MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&pool).await.expect("migration");
    }
    let pool = Arc::new(pool);

    let base = std::env::temp_dir().join(format!("fieldsync-e2e-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&base).await.expect("scratch dir");

    Harness {
        storage: StorageService::new(
            pool.clone(),
            base,
            "fieldsync",
            "http://storage.local:9000",
        ),
        projects: ProjectService::new(pool.clone()),
        jobs: JobService::new(pool),
    }
}

/// Upload `content` under the given prefix, the way the upload handler
/// does: digest first, then store with the digest attached.
async fn upload(
    storage: &StorageService,
    prefix: &str,
    name: &str,
    content: &'static [u8],
) -> String {
    let key = safe_join(prefix, &[name]).expect("key");
    let sha256 = digest::bytes_sha256(content);
    storage
        .put_object(
            &key,
            stream::iter([Ok::<_, io::Error>(Bytes::from_static(content))]),
            &sha256,
        )
        .await
        .expect("upload");
    key
}

#[tokio::test]
async fn package_flow_produces_a_hash_verifiable_export() {
    let h = harness().await;
    let project = h
        .projects
        .create_project("survey", "ana", false)
        .await
        .expect("project");
    let files_prefix = StorageService::project_files_prefix(project.id);

    // upload source data and the GIS project file
    upload(
        &h.storage,
        &files_prefix,
        "points.geojson",
        br#"{"type":"FeatureCollection","features":[]}"#,
    )
    .await;
    upload(&h.storage, &files_prefix, "project.qgs", b"<qgis/>").await;

    // recognition: exactly one project file
    let recognized = h.storage.project_file(project.id).await.expect("scan");
    assert_eq!(recognized.as_deref(), Some("project.qgs"));
    h.projects
        .set_project_filename(project.id, recognized.as_deref())
        .await
        .expect("pointer");
    let project = h.projects.get_project(project.id).await.expect("reload");

    // admission allows, and the job excludes any concurrent work
    h.jobs
        .may_create(&project, JobType::Package)
        .await
        .expect("admission");
    let job = h
        .jobs
        .create_job(&project, "ana", JobType::Package)
        .await
        .expect("create");
    assert!(matches!(
        h.jobs.may_create(&project, JobType::Apply).await,
        Err(JobError::AdmissionDenied(DenyReason::ActiveJobExists))
    ));

    // the worker claims the job and pushes packaged output
    h.jobs
        .update_status(job.id, JobStatus::Queued, None, None)
        .await
        .expect("queued");
    h.jobs
        .update_status(job.id, JobStatus::Started, None, None)
        .await
        .expect("started");

    let export_prefix = StorageService::project_export_prefix(project.id);
    upload(&h.storage, &export_prefix, "project.qgs", b"<qgis packaged/>").await;
    upload(&h.storage, &export_prefix, "layers/points.gpkg", b"GPKG-bytes").await;

    let finished = h
        .jobs
        .update_status(
            job.id,
            JobStatus::Finished,
            Some(r#"{"steps":[{"stage":1,"name":"export"}]}"#.to_string()),
            Some("packaging done".to_string()),
        )
        .await
        .expect("finished");
    assert_eq!(finished.status.client_status(), "STATUS_FINISHED");
    h.projects.mark_packaged(project.id).await.expect("stamp");

    // admission opens up again once the job is terminal
    h.jobs
        .may_create(&project, JobType::Apply)
        .await
        .expect("admission reopens");

    // the export listing is non-empty and every file verifies against
    // its stored digest
    use futures::StreamExt;
    let stream = h.storage.list(&export_prefix, true);
    futures::pin_mut!(stream);
    let mut names = Vec::new();
    while let Some(object) = stream.next().await {
        let object = object.expect("listing");
        let stored = h
            .storage
            .head_digest(&object.key)
            .await
            .expect("head")
            .expect("digest present");

        let (_meta, mut file) = h.storage.open_object(&object.key).await.expect("open");
        let mut payload = Vec::new();
        file.read_to_end(&mut payload).await.expect("read");
        assert_eq!(digest::bytes_sha256(&payload), stored, "{}", object.key);

        names.push(object.name);
    }
    assert_eq!(names, ["layers/points.gpkg", "project.qgs"]);

    // the packaged set includes a recognizable project file
    assert!(names.iter().any(|n| n.ends_with(".qgs")));

    let project = h.projects.get_project(project.id).await.expect("reload");
    assert!(project.data_last_packaged_at.is_some());
}
