//! Object storage: the store client seam and the multipart orchestrator.

#[cfg(test)]
pub mod memory;
pub mod multipart;
pub mod object;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::StoreError;

pub use multipart::{MultipartUploader, PartPolicy};
pub use object::S3Store;

/// A buffered file headed for the store.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// The entity tag the store returned for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: i32,
    pub etag: String,
}

/// What the store reported about a written object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Primitive operations against an object store. Each call is a single
/// round trip with no retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<StoreResponse, StoreError>;

    /// Opens a multipart session and returns its upload id.
    async fn begin_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Uploads one part and returns its entity tag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// `parts` must be in ascending part number order with no gaps.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<StoreResponse, StoreError>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError>;
}
