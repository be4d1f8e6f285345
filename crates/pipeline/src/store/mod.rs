//! Object storage for published archives.
//!
//! [`ObjectStore::put`] uploads bytes under a key and returns a URL the
//! client can retrieve them from. Keys are deterministic per request, so a
//! second `put` under the same key replaces the first.

mod local;
mod memory;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::StorageConfig;
use crate::error::StorageError;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoredObject};
pub use s3::S3Store;

/// Durable destination for archives.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key` and return a retrievable URL.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, StorageError>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Construct the configured store.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::S3 {
            bucket,
            endpoint,
            force_path_style,
            public_base_url,
            url_ttl,
        } => Arc::new(
            S3Store::connect(
                bucket.clone(),
                endpoint.clone(),
                *force_path_style,
                public_base_url.clone(),
                *url_ttl,
            )
            .await?,
        ),
        StorageConfig::Local {
            root,
            public_base_url,
        } => Arc::new(LocalStore::new(root.clone(), public_base_url.clone())),
        StorageConfig::Memory { public_base_url } => {
            Arc::new(MemoryStore::new(public_base_url.clone()))
        }
    };
    tracing::info!(backend = store.backend(), "Object store configured");
    Ok(store)
}

/// Join a base URL and an object key with exactly one slash.
pub(crate) fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_normalizes_slashes() {
        assert_eq!(public_url("http://h/files/", "/a/b.zip"), "http://h/files/a/b.zip");
        assert_eq!(public_url("http://h/files", "a/b.zip"), "http://h/files/a/b.zip");
    }
}
