//! Single-pass grouping of a version listing into per-key histories.
//!
//! The input is ordered by key, then by recency within a key (the store's
//! native listing order, provided here by the SQL `ORDER BY`). Grouping is
//! a genuine single forward pass: O(n) in total versions, with auxiliary
//! memory bounded by the versions of the current key only. It never
//! re-sorts, buffers the whole input, or issues a second query per key.

use crate::models::object::{FileVersions, StoredObjectVersion};
use crate::services::storage_service::{StorageError, StorageResult};
use std::mem;

/// Push-based grouping state machine.
///
/// Feed versions in listing order with [`push`](Self::push); each time the
/// key changes the previous key's finished group is returned. Call
/// [`finish`](Self::finish) once the input is exhausted to flush the final
/// pending group.
#[derive(Default)]
pub struct VersionGrouper {
    current_key: Option<String>,
    versions: Vec<StoredObjectVersion>,
    latest: Option<StoredObjectVersion>,
}

impl VersionGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the next version. Returns the completed group for the
    /// previous key when `version` starts a new key.
    pub fn push(
        &mut self,
        version: StoredObjectVersion,
    ) -> StorageResult<Option<FileVersions>> {
        let mut emitted = None;

        if self.current_key.as_deref() != Some(version.key.as_str()) {
            if self.current_key.is_some() {
                emitted = Some(self.take_group()?);
            }
            self.current_key = Some(version.key.clone());
        }

        if version.is_latest {
            self.latest = Some(version.clone());
        }
        self.versions.push(version);

        Ok(emitted)
    }

    /// Flush the final pending group, if any.
    pub fn finish(&mut self) -> StorageResult<Option<FileVersions>> {
        if self.current_key.take().is_some() {
            Ok(Some(self.take_group()?))
        } else {
            Ok(None)
        }
    }

    fn take_group(&mut self) -> StorageResult<FileVersions> {
        let versions = mem::take(&mut self.versions);
        // A non-empty group without a latest-flagged member means the
        // store's listing invariant was violated. Fail loudly.
        let latest = self.latest.take().ok_or_else(|| {
            StorageError::MissingLatestVersion(
                versions
                    .first()
                    .map(|v| v.key.clone())
                    .unwrap_or_default(),
            )
        })?;

        Ok(FileVersions { latest, versions })
    }
}

/// Lazily group an already-ordered version iterator into per-key version
/// sets, preserving input order of first appearance.
pub fn group_versions<I>(versions: I) -> GroupedVersions<I::IntoIter>
where
    I: IntoIterator<Item = StoredObjectVersion>,
{
    GroupedVersions {
        inner: versions.into_iter(),
        grouper: VersionGrouper::new(),
        done: false,
    }
}

/// Iterator adaptor returned by [`group_versions`].
pub struct GroupedVersions<I> {
    inner: I,
    grouper: VersionGrouper,
    done: bool,
}

impl<I> Iterator for GroupedVersions<I>
where
    I: Iterator<Item = StoredObjectVersion>,
{
    type Item = StorageResult<FileVersions>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.inner.next() {
                Some(version) => match self.grouper.push(version) {
                    Ok(Some(group)) => return Some(Ok(group)),
                    Ok(None) => continue,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
                None => {
                    self.done = true;
                    return match self.grouper.finish() {
                        Ok(Some(group)) => Some(Ok(group)),
                        Ok(None) => None,
                        Err(err) => Some(Err(err)),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn version(key: &str, is_latest: bool) -> StoredObjectVersion {
        StoredObjectVersion {
            name: key.to_string(),
            key: key.to_string(),
            size: 1,
            last_modified: Utc::now(),
            etag: "etag".to_string(),
            version_id: Uuid::new_v4(),
            is_latest,
        }
    }

    #[test]
    fn groups_consecutive_keys_and_flags_latest() {
        let listing = vec![
            version("a", false),
            version("a", true),
            version("a", false),
            version("b", false),
            version("b", true),
        ];
        let latest_a = listing[1].version_id;
        let latest_b = listing[4].version_id;

        let groups: Vec<_> = group_versions(listing)
            .collect::<StorageResult<Vec<_>>>()
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].latest.key, "a");
        assert_eq!(groups[0].latest.version_id, latest_a);
        assert_eq!(groups[0].versions.len(), 3);
        assert_eq!(groups[1].latest.key, "b");
        assert_eq!(groups[1].latest.version_id, latest_b);
        assert_eq!(groups[1].versions.len(), 2);
    }

    #[test]
    fn preserves_first_appearance_order() {
        let listing = vec![
            version("z", true),
            version("a", true),
            version("m", true),
        ];

        let keys: Vec<_> = group_versions(listing)
            .map(|g| g.unwrap().latest.key)
            .collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn empty_listing_yields_no_groups() {
        assert_eq!(group_versions(Vec::new()).count(), 0);
    }

    #[test]
    fn group_without_latest_fails_loudly() {
        let listing = vec![version("a", false), version("a", false)];

        let mut groups = group_versions(listing);
        match groups.next() {
            Some(Err(StorageError::MissingLatestVersion(key))) => assert_eq!(key, "a"),
            other => panic!("expected MissingLatestVersion, got {:?}", other.is_some()),
        }
        assert!(groups.next().is_none());
    }

    #[test]
    fn single_version_groups_emit_themselves() {
        let listing = vec![version("only", true)];
        let groups: Vec<_> = group_versions(listing)
            .collect::<StorageResult<Vec<_>>>()
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].versions.len(), 1);
        assert!(groups[0].versions[0].is_latest);
    }
}
