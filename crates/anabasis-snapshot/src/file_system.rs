//! File-system snapshot store.
//!
//! Layout: `<root>/<filters concatenated>/<stream_id>/<version>`, one pretty
//! printed JSON document per file. A snapshot is written to a temporary file
//! first and then hard-linked into place, so readers never observe a partial
//! document and an existing version is never replaced.

use std::io::{self, ErrorKind};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anabasis_core::aggregate::Aggregate;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::config::SnapshotStoreConfig;
use crate::error::SnapshotError;
use crate::store::{SnapshotRef, SnapshotSelector, SnapshotStore};

/// Snapshot store writing JSON documents under a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemSnapshotStore<A> {
    root: PathBuf,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> FileSystemSnapshotStore<A> {
    /// Creates a store rooted at `config.repository_directory`. Nothing is
    /// created on disk until the first save.
    #[must_use]
    pub fn new(config: SnapshotStoreConfig) -> Self {
        Self {
            root: config.repository_directory,
            _aggregate: PhantomData,
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn filter_directory(&self, filters: &[&str]) -> Result<PathBuf, SnapshotError> {
        let tag = filters.concat();
        if tag.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(segment(&tag)?))
    }

    fn stream_directory(&self, stream_id: &str, filters: &[&str]) -> Result<PathBuf, SnapshotError> {
        Ok(self.filter_directory(filters)?.join(segment(stream_id)?))
    }
}

fn segment(value: &str) -> Result<&str, SnapshotError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SnapshotError::InvalidSegment(value.to_owned()));
    }
    Ok(value)
}

/// Versions stored in `directory`, in ascending order.
async fn versions(directory: &Path) -> io::Result<Vec<i64>> {
    let mut entries = fs::read_dir(directory).await?;
    let mut versions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(version) = entry.file_name().to_str().and_then(|name| name.parse::<i64>().ok()) {
            versions.push(version);
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

async fn read<A: DeserializeOwned>(path: &Path) -> Result<A, SnapshotError> {
    let bytes = fs::read(path)
        .await
        .map_err(|source| SnapshotError::io(path, source))?;
    let aggregate = serde_json::from_slice(&bytes).map_err(|source| {
        SnapshotError::Serialization {
            path: path.to_owned(),
            source,
        }
    })?;
    debug!(path = %path.display(), "loaded snapshot");
    Ok(aggregate)
}

async fn write_new(directory: &Path, path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    fs::create_dir_all(directory)
        .await
        .map_err(|source| SnapshotError::io(directory, source))?;

    let temp = directory.join(format!(".{}.tmp", Uuid::new_v4()));
    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    if let Err(source) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(SnapshotError::io(&temp, source));
    }

    let linked = fs::hard_link(&temp, path).await;
    let _ = fs::remove_file(&temp).await;
    match linked {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(SnapshotError::AlreadyExists(path.to_owned()))
        }
        Err(source) => Err(SnapshotError::io(path, source)),
    }
}

#[async_trait]
impl<A> SnapshotStore<A> for FileSystemSnapshotStore<A>
where
    A: Aggregate + Serialize + DeserializeOwned,
{
    async fn save(
        &self,
        stream_id: &str,
        filters: &[&str],
        aggregate: &A,
    ) -> Result<SnapshotRef, SnapshotError> {
        let directory = self.stream_directory(stream_id, filters)?;
        let version = aggregate.version();
        let path = directory.join(version.to_string());
        let bytes = serde_json::to_vec_pretty(aggregate).map_err(|source| {
            SnapshotError::Serialization {
                path: path.clone(),
                source,
            }
        })?;

        write_new(&directory, &path, &bytes).await?;
        debug!(stream_id, version, path = %path.display(), "saved snapshot");
        Ok(SnapshotRef {
            stream_id: stream_id.to_owned(),
            version,
            path,
        })
    }

    async fn get(&self, stream_id: &str, filter: &str) -> Result<A, SnapshotError> {
        let directory = self.stream_directory(stream_id, &[filter])?;
        let latest = versions(&directory)
            .await
            .map_err(|source| SnapshotError::io(&directory, source))?
            .pop()
            .ok_or_else(|| {
                SnapshotError::io(
                    &directory,
                    io::Error::new(ErrorKind::NotFound, "no snapshot version stored"),
                )
            })?;
        read(&directory.join(latest.to_string())).await
    }

    async fn get_version(
        &self,
        stream_id: &str,
        filters: &[&str],
        version: i64,
    ) -> Result<A, SnapshotError> {
        let path = self
            .stream_directory(stream_id, filters)?
            .join(version.to_string());
        read(&path).await
    }

    async fn list(&self, filters: &[&str]) -> Result<Vec<SnapshotRef>, SnapshotError> {
        let directory = self.filter_directory(filters)?;
        let mut streams = match fs::read_dir(&directory).await {
            Ok(streams) => streams,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SnapshotError::io(&directory, source)),
        };

        let mut found = Vec::new();
        loop {
            let entry = streams
                .next_entry()
                .await
                .map_err(|source| SnapshotError::io(&directory, source))?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map_err(|source| SnapshotError::io(&path, source))?
                .is_dir();
            let Some(stream_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_dir {
                continue;
            }

            let stream_versions = versions(&path)
                .await
                .map_err(|source| SnapshotError::io(&path, source))?;
            found.extend(stream_versions.into_iter().map(|version| SnapshotRef {
                stream_id: stream_id.clone(),
                version,
                path: path.join(version.to_string()),
            }));
        }

        found.sort_by(|a, b| (&a.stream_id, a.version).cmp(&(&b.stream_id, b.version)));
        Ok(found)
    }

    async fn select(
        &self,
        filters: &[&str],
        selector: SnapshotSelector<'_>,
    ) -> Result<Option<A>, SnapshotError> {
        let candidates = self.list(filters).await?;
        match selector(&candidates) {
            Some(chosen) => read(&chosen.path).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use anabasis_test_support::{CurrencyPair, CurrencyPairEvent};
    use tempfile::TempDir;

    use super::*;

    fn store(dir: &TempDir) -> FileSystemSnapshotStore<CurrencyPair> {
        FileSystemSnapshotStore::new(SnapshotStoreConfig {
            repository_directory: dir.path().join("snapshots"),
        })
    }

    fn pair_at(id: &str, version: i64) -> CurrencyPair {
        let mut pair = CurrencyPair::default();
        pair.apply_recorded(CurrencyPairEvent::created(id), 0, false);
        for sequence_number in 1..=version {
            pair.apply_recorded(CurrencyPairEvent::price_changed(id, 1.0, 1.5), sequence_number, false);
        }
        pair
    }

    #[tokio::test]
    async fn test_save_lays_out_filters_stream_and_version() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        // Act
        let saved = store
            .save("EURUSD", &["fx", "majors"], &pair_at("EURUSD", 2))
            .await
            .unwrap();

        // Assert
        assert_eq!(saved.version, 2);
        assert_eq!(
            saved.path,
            dir.path().join("snapshots").join("fxmajors").join("EURUSD").join("2")
        );
        assert!(saved.path.is_file());
    }

    #[tokio::test]
    async fn test_get_returns_latest_version() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save("EURUSD", &["fx"], &pair_at("EURUSD", 1)).await.unwrap();
        store.save("EURUSD", &["fx"], &pair_at("EURUSD", 3)).await.unwrap();

        // Act
        let restored = store.get("EURUSD", "fx").await.unwrap();

        // Assert
        assert_eq!(restored.version(), 3);
        assert_eq!(restored.quotes, 3);
        assert_eq!(restored.id.as_deref(), Some("EURUSD"));
    }

    #[tokio::test]
    async fn test_get_missing_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let result = store.get("EURUSD", "fx").await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_saving_the_same_version_twice_is_denied() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save("EURUSD", &["fx"], &pair_at("EURUSD", 1)).await.unwrap();
        let mut renamed = pair_at("EURUSD", 1);
        renamed.name = "changed".into();

        // Act
        let result = store.save("EURUSD", &["fx"], &renamed).await;

        // Assert
        assert!(matches!(result, Err(SnapshotError::AlreadyExists(_))));
        let kept = store.get_version("EURUSD", &["fx"], 1).await.unwrap();
        assert_eq!(kept.name, "EURUSD");
    }

    #[tokio::test]
    async fn test_path_segments_are_validated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let slash = store.save("EUR/USD", &["fx"], &pair_at("EUR/USD", 0)).await;
        let parent = store.get("..", "fx").await;

        assert!(matches!(slash, Err(SnapshotError::InvalidSegment(_))));
        assert!(matches!(parent, Err(SnapshotError::InvalidSegment(_))));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_a_serialization_error() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let saved = store.save("EURUSD", &[], &pair_at("EURUSD", 0)).await.unwrap();
        std::fs::write(&saved.path, b"not json").unwrap();

        // Act
        let result = store.get_version("EURUSD", &[], 0).await;

        // Assert
        assert!(matches!(result, Err(SnapshotError::Serialization { .. })));
    }
}
