//! Represents objects and object versions held in the project store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A stored object as seen through a prefix-scoped listing.
///
/// `key` is the full path within the bucket; `name` is the key with the
/// listing prefix stripped (when requested).
#[derive(Serialize, Clone, Debug)]
pub struct StoredObject {
    pub name: String,
    pub key: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

/// One version of a stored object. Versions of the same key form an
/// ordered history with exactly one `is_latest` member.
#[derive(Serialize, Clone, Debug)]
pub struct StoredObjectVersion {
    pub name: String,
    pub key: String,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub version_id: Uuid,
    pub is_latest: bool,
}

/// A key's full version history paired with its latest version.
#[derive(Serialize, Clone, Debug)]
pub struct FileVersions {
    pub latest: StoredObjectVersion,
    pub versions: Vec<StoredObjectVersion>,
}
