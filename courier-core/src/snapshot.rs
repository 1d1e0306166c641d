//! Durable record of messages that were still pending at shutdown.
//!
//! At most one snapshot exists at a time. The writer persists it during a
//! controlled shutdown and consumes it exactly once on the next start.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use courier_model::Message;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::SnapshotError;

#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Replace any existing snapshot with `messages`.
    async fn write(&self, messages: &[Message]) -> Result<(), SnapshotError>;

    /// Load the snapshot, or `None` when there is nothing to recover.
    async fn read(&self) -> Result<Option<Vec<Message>>, SnapshotError>;

    /// Remove the snapshot. Removing a missing snapshot succeeds.
    async fn delete(&self) -> Result<(), SnapshotError>;
}

/// JSON array of messages in a single file.
#[derive(Clone, Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.path
            .with_file_name(format!("{name}.tmp-{}", Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write(&self, messages: &[Message]) -> Result<(), SnapshotError> {
        let bytes =
            serde_json::to_vec(messages).map_err(SnapshotError::Encode)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.io_error(err))?;
        }

        // Write beside the target and rename so a torn write never replaces
        // a complete snapshot.
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| self.io_error(err))?;
        file.write_all(&bytes)
            .await
            .map_err(|err| self.io_error(err))?;
        file.sync_all().await.map_err(|err| self.io_error(err))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(err));
        }
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<Message>>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(self.io_error(err)),
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|source| {
            SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })
    }

    async fn delete(&self) -> Result<(), SnapshotError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}
