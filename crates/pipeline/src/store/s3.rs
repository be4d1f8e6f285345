use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use super::{public_url, ObjectStore};
use crate::error::StorageError;

/// S3 or S3-compatible bucket.
///
/// Returns a presigned GET URL valid for `url_ttl`, or a plain
/// `{public_base_url}/{key}` link when the bucket is fronted by a CDN.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: Option<String>,
    url_ttl: Duration,
}

impl S3Store {
    /// Build a client from the standard AWS environment (credentials,
    /// region), optionally pointed at a custom endpoint.
    pub async fn connect(
        bucket: String,
        endpoint: Option<String>,
        force_path_style: bool,
        public_base_url: Option<String>,
        url_ttl: Duration,
    ) -> Result<Self, StorageError> {
        if bucket.trim().is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".to_string()));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(force_path_style);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
            public_base_url,
            url_ttl,
        })
    }

    async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        let no_url = |message: String| StorageError::NoUrl {
            key: key.to_string(),
            message,
        };
        let presigning = PresigningConfig::expires_in(self.url_ttl).map_err(|e| no_url(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| no_url(DisplayErrorContext(&e).to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, StorageError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(bucket = %self.bucket, key, size, "Uploaded archive to S3");

        match &self.public_base_url {
            Some(base) => Ok(public_url(base, key)),
            None => self.presigned_url(key).await,
        }
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
