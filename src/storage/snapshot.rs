use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::feed::{parse_feed, DecodeError, Feed, ReadState};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Snapshot {path} could not be decoded: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("Failed to serialize snapshot for {url}: {message}")]
    Encode { url: String, message: String },
}

/// Outcome of persisting a batch of feeds.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: usize,
    /// `(feed url, error)` for each snapshot that could not be written
    pub failed: Vec<(String, SnapshotError)>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Directory of whole-feed snapshots, one file per subscription URL.
///
/// Files are named by the hex SHA-256 of the URL and hold the feed
/// re-serialized as RSS or Atom, with `<read>` and `<displayName>` extension
/// elements carrying the local state.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lowercase hex SHA-256 of the URL string.
    pub fn key_for(url: &str) -> String {
        format!("{:x}", Sha256::digest(url.as_bytes()))
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::key_for(url))
    }

    /// Loads the snapshot for `url`, restoring read flags and the display
    /// name override.
    ///
    /// Returns `Ok(None)` when no snapshot has been written yet.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::Io`] if the file exists but cannot be read
    /// - [`SnapshotError::Decode`] if its contents are not a feed
    pub async fn load(&self, url: &str) -> Result<Option<Feed>, SnapshotError> {
        let path = self.path_for(url);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(url = %url, "No snapshot yet");
                return Ok(None);
            }
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };

        parse_feed(&bytes, url, ReadState::Restore)
            .map(Some)
            .map_err(|source| SnapshotError::Decode { path, source })
    }

    /// Writes the snapshot for `feed`, replacing any previous one.
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// a concurrent [`load`](Self::load) sees either the old or the new
    /// snapshot, never a partial one.
    pub async fn save(&self, feed: &Feed) -> Result<(), SnapshotError> {
        let url = feed.url();
        let content = match feed {
            Feed::Rss(f) => f.to_snapshot_xml(),
            Feed::Atom(f) => f.to_snapshot_xml(),
        }
        .map_err(|e| SnapshotError::Encode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(url);
        write_atomic(&path, &content)
            .await
            .map_err(|source| SnapshotError::Io { path, source })?;

        tracing::debug!(url = %url, items = feed.len(), "Saved snapshot");
        Ok(())
    }

    /// Saves each feed in turn. A failure does not stop the remaining saves.
    pub async fn save_all<'a, I>(&self, feeds: I) -> SaveReport
    where
        I: IntoIterator<Item = &'a Feed>,
    {
        let mut report = SaveReport::default();
        for feed in feeds {
            match self.save(feed).await {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    tracing::warn!(url = %feed.url(), error = %e, "Failed to save snapshot");
                    report.failed.push((feed.url().to_string(), e));
                }
            }
        }
        report
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // SEC-009: Randomized temp filename so a pre-created symlink cannot be followed
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}
