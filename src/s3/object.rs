use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::{
    context::BeforeDeserializationInterceptorContextRef, Intercept,
};
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_types::config_bag::ConfigBag;
use aws_types::region::Region;
use bytes::Bytes;
use s3::primitives::ByteStream;
use tracing::debug;

use crate::config::{Config, DEFAULT_REGION};
use crate::error::{StoreError, StoreOp};
use crate::s3::{ObjectStore, PartResult, StoreResponse};

/// [`ObjectStore`] backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the process configuration. The SDK's retry layer
    /// is turned off so every failure reaches the caller on the first attempt.
    pub async fn connect(config: &Config) -> Self {
        let configured_region = config.aws_region.clone().map(Region::new);
        let region_provider = RegionProviderChain::first_try(configured_region)
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(RetryConfig::disabled());
        if let Some((key_id, secret)) = config.static_credentials() {
            let credentials = Credentials::new(key_id, secret, None, None, "environment");
            loader = loader.credentials_provider(credentials);
        }
        let sdk_config = loader.load().await;

        let mut builder = s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.aws_endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(s3::Client::from_conf(builder.build()), config.aws_bucket_name.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Fails a call whose 2xx reply is not the status the operation answers
/// with on success. Other statuses are left to the SDK's error handling.
#[derive(Debug)]
struct ExpectStatus {
    op: StoreOp,
    status: u16,
}

impl ExpectStatus {
    fn new(op: StoreOp, status: u16) -> Self {
        Self { op, status }
    }
}

impl Intercept for ExpectStatus {
    fn name(&self) -> &'static str {
        "ExpectStatus"
    }

    fn read_before_deserialization(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let actual = context.response().status().as_u16();
        if (200..300).contains(&actual) && actual != self.status {
            return Err(format!(
                "{} answered {actual}, expected {}",
                self.op, self.status
            )
            .into());
        }
        Ok(())
    }
}

fn sdk_failure<E>(op: StoreOp, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status_code = err.raw_response().map(|response| response.status().as_u16());
    let message = err
        .message()
        .map(str::to_owned)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    StoreError::new(op, status_code, message)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<StoreResponse, StoreError> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_owned))
            .customize()
            .interceptor(ExpectStatus::new(StoreOp::PutObject, 200))
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::PutObject, err))?;

        debug!(key, "put object");
        Ok(StoreResponse {
            bucket: Some(self.bucket.clone()),
            key: Some(key.to_owned()),
            location: None,
            etag: output.e_tag().map(str::to_owned),
            version_id: output.version_id().map(str::to_owned),
        })
    }

    async fn begin_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_owned))
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::CreateMultipartUpload, err))?;

        output.upload_id().map(str::to_owned).ok_or_else(|| {
            StoreError::new(
                StoreOp::CreateMultipartUpload,
                None,
                "CreateMultipartUpload returned no upload id",
            )
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::UploadPart, err))?;

        output.e_tag().map(str::to_owned).ok_or_else(|| {
            StoreError::new(
                StoreOp::UploadPart,
                None,
                format!("UploadPart returned no ETag for part {part_number}"),
            )
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<StoreResponse, StoreError> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::CompleteMultipartUpload, err))?;

        Ok(StoreResponse {
            bucket: output.bucket().map(str::to_owned),
            key: output.key().map(str::to_owned),
            location: output.location().map(str::to_owned),
            etag: output.e_tag().map(str::to_owned),
            version_id: output.version_id().map(str::to_owned),
        })
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        match response {
            Ok(_) => Ok(()),
            // Already completed or aborted elsewhere; nothing left to release.
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_upload()) => {
                debug!(key, upload_id, "multipart upload already gone");
                Ok(())
            }
            Err(err) => Err(sdk_failure(StoreOp::AbortMultipartUpload, err)),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .customize()
            .interceptor(ExpectStatus::new(StoreOp::DeleteObject, 204))
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::DeleteObject, err))?;

        debug!(key, "deleted object");
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), StoreError> {
        let invalid = |err: s3::error::BuildError| {
            StoreError::new(StoreOp::DeleteObjects, None, err.to_string())
        };

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(invalid)?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .customize()
            .interceptor(ExpectStatus::new(StoreOp::DeleteObjects, 200))
            .send()
            .await
            .map_err(|err| sdk_failure(StoreOp::DeleteObjects, err))?;

        // A 200 reply can still carry per-key failures.
        if let Some(first) = output.errors().first() {
            let failed = output.errors().len();
            return Err(StoreError::new(
                StoreOp::DeleteObjects,
                None,
                format!(
                    "{failed} of {} objects were not deleted ({}: {})",
                    keys.len(),
                    first.key().unwrap_or("unknown"),
                    first.message().or(first.code()).unwrap_or("unknown error"),
                ),
            ));
        }

        debug!(count = keys.len(), "deleted objects");
        Ok(())
    }
}
