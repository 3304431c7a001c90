//! Staging and record buckets.
use std::future::Future;
use std::time::Duration;

use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;

use crate::error::StoreError;

/// What the destination bucket reports about a copied object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: Option<i64>,
    pub version_id: Option<String>,
}

pub trait ObjectStore {
    fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> impl Future<Output = Result<ObjectInfo, StoreError>> + Send;

    fn delete_object(&self, bucket: &str, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Value of one tag on the object, `None` if the tag is not set.
    fn object_tag(
        &self,
        bucket: &str,
        key: &str,
        tag_key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `CopySource` must be URL-encoded; Lloyd George file names carry spaces and brackets.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded_key: Vec<String> = key.split('/').map(|segment| urlencoding::encode(segment).into_owned()).collect();
    format!("{}/{}", bucket, encoded_key.join("/"))
}

impl ObjectStore for S3ObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<ObjectInfo, StoreError> {
        let copied = self
            .client
            .copy_object()
            .copy_source(copy_source(source_bucket, source_key))
            .bucket(dest_bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| {
                StoreError::S3(format!(
                    "Failed to copy s3://{}/{} to s3://{}/{}: {}",
                    source_bucket,
                    source_key,
                    dest_bucket,
                    dest_key,
                    e.into_service_error()
                ))
            })?;

        let head = self
            .client
            .head_object()
            .bucket(dest_bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("Failed to read copied object metadata: {}", e.into_service_error())))?;

        Ok(ObjectInfo {
            size: head.content_length(),
            version_id: copied.version_id().map(|v| v.to_string()),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("Failed to delete s3://{}/{}: {}", bucket, key, e.into_service_error())))?;
        Ok(())
    }

    async fn object_tag(&self, bucket: &str, key: &str, tag_key: &str) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StoreError::S3(format!("Failed to read tags of s3://{}/{}: {}", bucket, key, e.into_service_error()))
            })?;

        Ok(output
            .tag_set()
            .iter()
            .find(|tag| tag.key() == tag_key)
            .map(|tag| tag.value().to_string()))
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presign_config)
            .await
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}
