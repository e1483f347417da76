//! StorageService — versioned, content-addressed project file storage.
//!
//! Metadata (keys, versions, digests) lives in SQLite; payloads live on
//! local disk beneath `base_path/{shard}/{shard}/{version}` so every
//! version of a key keeps its bytes. Keys follow the project layout
//! `projects/<id>/files/<path>` for sources and `projects/<id>/export/<path>`
//! for packaged output; listings and counts rely on that prefix scoping.

use crate::models::object::{FileVersions, StoredObject, StoredObjectVersion};
use crate::services::versions::VersionGrouper;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Canonical metadata key under which the content digest is written.
const DIGEST_METADATA_KEY: &str = "sha256sum";
/// Historical spelling still accepted on read.
const LEGACY_DIGEST_METADATA_KEY: &str = "Sha256sum";

/// Extensions recognized as desktop GIS project files.
const PROJECT_FILE_EXTENSIONS: [&str; 2] = [".qgs", ".qgz"];

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("path `{path}` is located outside of the base `{base}`")]
    PathEscape { base: String, path: String },
    #[error("version listing for key `{0}` has no latest version")]
    MissingLatestVersion(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Internal row shape shared by the object and version listings.
#[derive(sqlx::FromRow)]
struct VersionRow {
    key: String,
    size_bytes: i64,
    etag: String,
    last_modified: DateTime<Utc>,
    version_id: Uuid,
    is_latest: bool,
}

impl VersionRow {
    fn into_object(self, strip_len: usize) -> StoredObject {
        StoredObject {
            name: self.key.get(strip_len..).unwrap_or_default().to_string(),
            key: self.key,
            size: self.size_bytes,
            last_modified: self.last_modified,
            etag: self.etag,
        }
    }

    fn into_version(self, strip_len: usize) -> StoredObjectVersion {
        StoredObjectVersion {
            name: self.key.get(strip_len..).unwrap_or_default().to_string(),
            key: self.key,
            size: self.size_bytes,
            last_modified: self.last_modified,
            etag: self.etag,
            version_id: self.version_id,
            is_latest: self.is_latest,
        }
    }
}

/// Gateway over the versioned object store.
///
/// All operations are stateless between calls and safe to run
/// concurrently; writes are serialized per key by the database
/// transaction around the version insert.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for object metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where version payloads are stored.
    pub base_path: PathBuf,

    /// Logical bucket name, used only for URL construction.
    pub bucket: String,

    /// Public endpoint exposed in object URLs.
    pub public_url: String,
}

impl StorageService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
            public_url: public_url.into(),
        }
    }

    /// Basic key validation. Keys built from user-supplied segments must
    /// additionally go through [`safe_join`].
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Two-level shard identifiers for a version payload.
    ///
    /// Uses MD5(version) and returns the first two bytes as lowercase hex
    /// (00-ff). Reduces file count per directory.
    fn payload_shards(version: &str) -> (String, String) {
        let digest = md5::compute(version);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Physical path of one version's payload. Parent directories may not
    /// exist yet.
    fn payload_path(&self, version_id: Uuid) -> PathBuf {
        let version = version_id.simple().to_string();
        let (shard_a, shard_b) = Self::payload_shards(&version);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(version);
        path
    }

    /// Scratch directory for spooled uploads, inside the storage root.
    pub fn spool_dir(&self) -> PathBuf {
        self.base_path.join(".uploads")
    }

    /// Key prefix for a project's source files.
    pub fn project_files_prefix(project_id: Uuid) -> String {
        format!("projects/{}/files/", project_id)
    }

    /// Key prefix for a project's packaged output.
    pub fn project_export_prefix(project_id: Uuid) -> String {
        format!("projects/{}/export/", project_id)
    }

    /// Deterministic URL for a key from the configured public endpoint.
    /// Does not check existence.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_url.trim_end_matches('/'),
            self.bucket,
            key
        )
    }

    /// Upload a new version of `key`, attaching `sha256` as object
    /// metadata under the canonical digest key.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into the version's final location.
    /// - Inserts the version row and digest metadata in one transaction,
    ///   demoting the previous latest version of the key.
    pub async fn put_object<S>(
        &self,
        key: &str,
        stream: S,
        sha256: &str,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;

        let version_id = Uuid::new_v4();
        let file_path = self.payload_path(version_id);
        let parent = file_path.parent().map(PathBuf::from).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "version path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let last_modified = Utc::now();
        let etag = format!("{:x}", digest.compute());

        if let Err(err) = self
            .insert_version(key, size_bytes, &etag, last_modified, version_id, sha256)
            .await
        {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }

        Ok(StoredObject {
            name: key.to_string(),
            key: key.to_string(),
            size: size_bytes,
            last_modified,
            etag,
        })
    }

    async fn insert_version(
        &self,
        key: &str,
        size_bytes: i64,
        etag: &str,
        last_modified: DateTime<Utc>,
        version_id: Uuid,
        sha256: &str,
    ) -> StorageResult<()> {
        let object_id = Uuid::new_v4();
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE objects SET is_latest = 0 WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO objects (id, key, size_bytes, etag, last_modified, version_id, is_latest)
             VALUES (?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(object_id)
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(last_modified)
        .bind(version_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(object_id)
            .bind(DIGEST_METADATA_KEY)
            .bind(sha256)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch only the stored content digest of the latest version of
    /// `key`. Absent object or digest is a valid "no value" outcome, not
    /// an error; any other failure propagates.
    ///
    /// Both historical metadata spellings are accepted on read; the
    /// canonical one wins when both are present.
    pub async fn head_digest(&self, key: &str) -> StorageResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT m.value FROM object_metadata m
             JOIN objects o ON o.id = m.object_id
             WHERE o.key = ? AND o.is_latest = 1 AND m.key IN (?, ?)
             ORDER BY CASE WHEN m.key = ? THEN 0 ELSE 1 END
             LIMIT 1",
        )
        .bind(key)
        .bind(DIGEST_METADATA_KEY)
        .bind(LEGACY_DIGEST_METADATA_KEY)
        .bind(DIGEST_METADATA_KEY)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Lazy listing of the latest versions under `prefix`, ordered by key.
    /// When `strip_prefix` is set, each returned name has the prefix
    /// removed.
    pub fn list<'a>(
        &'a self,
        prefix: &str,
        strip_prefix: bool,
    ) -> impl Stream<Item = StorageResult<StoredObject>> + 'a {
        let strip_len = if strip_prefix { prefix.len() } else { 0 };

        sqlx::query_as::<_, VersionRow>(
            "SELECT key, size_bytes, etag, last_modified, version_id, is_latest
             FROM objects WHERE is_latest = 1 AND key LIKE ?
             ORDER BY key ASC",
        )
        .bind(format!("{}%", prefix))
        .fetch(&*self.db)
        .map(move |res| Ok(res?.into_object(strip_len)))
    }

    /// Lazy listing over the full version history under `prefix`, ordered
    /// by key, then by recency (newest first) within a key. This ordering
    /// is the contract the version grouper relies on.
    pub fn list_versions<'a>(
        &'a self,
        prefix: &str,
        strip_prefix: bool,
    ) -> impl Stream<Item = StorageResult<StoredObjectVersion>> + 'a {
        let strip_len = if strip_prefix { prefix.len() } else { 0 };

        sqlx::query_as::<_, VersionRow>(
            "SELECT key, size_bytes, etag, last_modified, version_id, is_latest
             FROM objects WHERE key LIKE ?
             ORDER BY key ASC, seq DESC",
        )
        .bind(format!("{}%", prefix))
        .fetch(&*self.db)
        .map(move |res| Ok(res?.into_version(strip_len)))
    }

    /// Group a project's source files into per-key version histories in a
    /// single streaming pass over the version listing.
    pub async fn list_files_with_versions(
        &self,
        project_id: Uuid,
    ) -> StorageResult<Vec<FileVersions>> {
        let prefix = Self::project_files_prefix(project_id);
        let stream = self.list_versions(&prefix, true);
        pin_mut!(stream);

        let mut grouper = VersionGrouper::new();
        let mut groups = Vec::new();
        while let Some(version) = stream.next().await {
            if let Some(group) = grouper.push(version?)? {
                groups.push(group);
            }
        }
        if let Some(group) = grouper.finish()? {
            groups.push(group);
        }

        Ok(groups)
    }

    /// Open the latest version of `key` for reading.
    ///
    /// Returns metadata and a File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but the payload is
    /// missing.
    pub async fn open_object(&self, key: &str) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;

        let row: Option<VersionRow> = sqlx::query_as(
            "SELECT key, size_bytes, etag, last_modified, version_id, is_latest
             FROM objects WHERE key = ? AND is_latest = 1",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        let row = row.ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        let file_path = self.payload_path(row.version_id);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((row.into_object(0), file))
    }

    /// Delete every version of `key`, metadata rows first, payloads
    /// best-effort afterwards.
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;

        let versions: Vec<(Uuid,)> =
            sqlx::query_as("SELECT version_id FROM objects WHERE key = ?")
                .bind(key)
                .fetch_all(&*self.db)
                .await?;
        if versions.is_empty() {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "DELETE FROM object_metadata
             WHERE object_id IN (SELECT id FROM objects WHERE key = ?)",
        )
        .bind(key)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for (version_id,) in versions {
            let file_path = self.payload_path(version_id);
            match fs::remove_file(&file_path).await {
                Ok(_) => debug!("removed payload {}", file_path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("payload {} already missing", file_path.display());
                }
                Err(err) => {
                    debug!("failed to remove payload {}: {}", file_path.display(), err)
                }
            }
        }

        Ok(())
    }

    /// Relative path of the project's recognized GIS project file, or
    /// `None`. First match in key order wins.
    pub async fn project_file(&self, project_id: Uuid) -> StorageResult<Option<String>> {
        let prefix = Self::project_files_prefix(project_id);
        let stream = self.list(&prefix, true);
        pin_mut!(stream);

        while let Some(obj) = stream.next().await {
            let obj = obj?;
            if is_project_file(&obj.name) {
                return Ok(Some(obj.name));
            }
        }
        Ok(None)
    }

    /// Total stored bytes of a project's latest versions, sources and
    /// packaged output included.
    pub async fn project_size(&self, project_id: Uuid) -> StorageResult<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM objects
             WHERE is_latest = 1 AND key LIKE ?",
        )
        .bind(format!("projects/{}/%", project_id))
        .fetch_one(&*self.db)
        .await?;
        Ok(total)
    }

    /// Number of latest-version objects under a prefix.
    pub async fn files_count(&self, prefix: &str) -> StorageResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM objects WHERE is_latest = 1 AND key LIKE ?",
        )
        .bind(format!("{}%", prefix))
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }
}

/// Returns whether the filename looks like a desktop GIS project file,
/// by extension.
pub fn is_project_file(filename: &str) -> bool {
    PROJECT_FILE_EXTENSIONS
        .iter()
        .any(|ext| filename.ends_with(ext))
}

/// Join path segments under `base`, collapsing `.` and `..`, and fail
/// with [`StorageError::PathEscape`] if the result does not stay within
/// `base`.
///
/// Containment is checked after every appended segment, so an
/// intermediate `..` that exits `base` is rejected even if a later
/// segment would re-enter it. The check requires a boundary match
/// (`base` followed by a separator), so `base2` never wrongly matches
/// `base`. Trailing-slash semantics are preserved: a segment ending in
/// `/` keeps the result a "directory" key. The returned key carries no
/// leading slash.
pub fn safe_join(base: &str, segments: &[&str]) -> StorageResult<String> {
    let base_path = base.trim_end_matches('/');
    let escape = |path: &str| StorageError::PathEscape {
        base: base_path.to_string(),
        path: path.to_string(),
    };

    let mut final_path = format!("{}/", base_path);
    for segment in segments {
        let joined = join_posix(&final_path, segment);
        let mut candidate = normalize_posix(&joined);
        // normalization strips the trailing slash; restore it for
        // directory segments
        if segment.ends_with('/') || format!("{}/", candidate) == final_path {
            candidate.push('/');
        }
        final_path = candidate;

        if !contained(&final_path, base_path) {
            return Err(escape(&final_path));
        }
    }
    if final_path == base_path {
        final_path.push('/');
    }

    if !contained(&final_path, base_path) {
        return Err(escape(&final_path));
    }

    Ok(final_path.trim_start_matches('/').to_string())
}

/// `path` stays within `base`: equal, or `base` plus a separator.
fn contained(path: &str, base: &str) -> bool {
    path == base
        || (path.starts_with(base) && path.as_bytes().get(base.len()) == Some(&b'/'))
}

fn join_posix(base: &str, segment: &str) -> String {
    if segment.starts_with('/') {
        segment.to_string()
    } else if base.is_empty() || base.ends_with('/') {
        format!("{}{}", base, segment)
    } else {
        format!("{}/{}", base, segment)
    }
}

/// POSIX-style lexical normalization: collapses `//`, `.` and `..`
/// without consulting the filesystem.
fn normalize_posix(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|last| *last != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
