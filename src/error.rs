//! Error types shared by the store client, the orchestrator and the HTTP layer.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::http::ApiResponse;

/// Store operations, named after the S3 actions they map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    DeleteObject,
    DeleteObjects,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::PutObject => "PutObject",
            StoreOp::CreateMultipartUpload => "CreateMultipartUpload",
            StoreOp::UploadPart => "UploadPart",
            StoreOp::CompleteMultipartUpload => "CompleteMultipartUpload",
            StoreOp::AbortMultipartUpload => "AbortMultipartUpload",
            StoreOp::DeleteObject => "DeleteObject",
            StoreOp::DeleteObjects => "DeleteObjects",
        };
        f.write_str(name)
    }
}

/// A single store round trip that did not succeed.
///
/// `status_code` is the HTTP status the store answered with, when the request
/// got that far. Transport failures carry `None`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} failed: {message}")]
pub struct StoreError {
    pub op: StoreOp,
    pub status_code: Option<u16>,
    pub message: String,
}

impl StoreError {
    pub fn new(op: StoreOp, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            op,
            status_code,
            message: message.into(),
        }
    }
}

/// Failure while releasing a multipart session after another failure.
/// Logged only; the original failure is what callers see.
#[derive(Debug, Error)]
#[error("failed to abort multipart upload {upload_id} for {key}: {source}")]
pub struct SessionAbortError {
    pub key: String,
    pub upload_id: String,
    #[source]
    pub source: StoreError,
}

/// Rejections raised before any store interaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please upload 1 file.")]
    MissingFile,

    #[error("You can upload a maximum of {limit} files")]
    TooManyFiles { limit: usize },

    #[error("{name} size limit exceeded. Max size: {max} bytes.")]
    TooLarge { name: String, max: usize },

    #[error("{name} file type not allowed. Allowed extensions: {}.", allowed.join(", "))]
    ExtensionNotAllowed {
        name: String,
        allowed: Vec<&'static str>,
    },

    #[error("Please provide at least 1 file name.")]
    MissingFileName,

    #[error("{0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("AWS_BUCKET_NAME must be set")]
    MissingBucket,

    #[error("AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be provided together")]
    IncompleteCredentials,
}

/// Request-level failure. Every variant answers `400` with
/// `{"success": false, "message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A store call failed. `fallback` is the route's message for errors
    /// that carry no text of their own.
    #[error("{source}")]
    Store {
        #[source]
        source: StoreError,
        fallback: &'static str,
    },

    #[error("{0}")]
    Upload(String),
}

impl ApiError {
    pub fn store(fallback: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| ApiError::Store { source, fallback }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Store { source, fallback } if source.message.trim().is_empty() => {
                (*fallback).to_owned()
            }
            ApiError::Store { source, .. } => source.message.clone(),
            other => other.to_string(),
        };
        tracing::debug!(error = %self, "request rejected");
        (StatusCode::BAD_REQUEST, Json(ApiResponse::failure(message))).into_response()
    }
}
