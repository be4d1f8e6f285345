use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{public_url, ObjectStore};
use crate::error::StorageError;

/// Archives on local disk, served by the API's `/files` route.
pub struct LocalStore {
    root: PathBuf,
    base_url: String,
}

impl LocalStore {
    pub fn new(root: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            root,
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `key`. Rejects keys escaping the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::Upload {
                key: key.to_string(),
                message: "key must be a relative path without '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self
            .path_for(key)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Each writer gets its own temp file next to the target; the last
        // rename wins and readers never see a torn file.
        let file_name = path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty key"))?;
        let tmp = path.with_file_name(format!(
            "{}.{}.part",
            file_name.to_string_lossy(),
            Uuid::new_v4()
        ));
        if let Err(e) = write_and_rename(&tmp, &path, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        tracing::debug!(path = %path.display(), "Saved archive");
        Ok(())
    }
}

async fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    fs::rename(tmp, path).await
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<String, StorageError> {
        self.write(key, &bytes).await.map_err(|e| StorageError::Upload {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(public_url(&self.base_url, key))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
