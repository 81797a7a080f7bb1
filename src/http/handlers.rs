use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{ApiError, ValidationError};
use crate::http::validate::{IMAGE_RULE, VIDEO_RULE};
use crate::http::{object_key, ApiResponse, AppState};
use crate::s3::UploadTarget;

type ApiResult = Result<Json<ApiResponse>, ApiError>;

const UPLOAD_FAILED: &str = "Error while file uploading!";
const MULTIPART_FAILED: &str = "Error while multipart file uploading!";
const DELETE_FAILED: &str = "Error while file deleting!";

fn malformed(message: String) -> ApiError {
    ApiError::Validation(ValidationError::Malformed(message))
}

/// `POST /upload`: a small image stored with a single put.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let multipart = multipart.map_err(|rejection| malformed(rejection.body_text()))?;
    let file = IMAGE_RULE
        .check(IMAGE_RULE.collect(multipart).await?)?
        .ok_or(ValidationError::MissingFile)?;

    let key = object_key(&file.file_name);
    let content_type = file.effective_content_type();
    state
        .store
        .put_object(&key, file.data, content_type.as_deref())
        .await
        .map_err(ApiError::store(UPLOAD_FAILED))?;

    info!(%key, "stored file");
    Ok(Json(ApiResponse::ok("File uploading process is done!")))
}

/// `POST /upload-multipart`: a video stored through a multipart session.
pub async fn upload_multipart_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let multipart = multipart.map_err(|rejection| malformed(rejection.body_text()))?;
    let file = VIDEO_RULE
        .check(VIDEO_RULE.collect(multipart).await?)?
        .ok_or(ValidationError::MissingFile)?;

    let target = UploadTarget {
        key: object_key(&file.file_name),
        content_type: file.effective_content_type(),
        body: file.data,
    };

    // Detached so a dropped connection cannot strand an open session.
    let uploader = state.uploader.clone();
    let outcome = tokio::spawn(async move { uploader.upload_large(target).await })
        .await
        .map_err(|err| {
            error!(error = %err, "multipart upload task failed");
            ApiError::Upload(MULTIPART_FAILED.into())
        })?;

    if !outcome.success {
        let message = if outcome.message.trim().is_empty() {
            MULTIPART_FAILED.to_owned()
        } else {
            outcome.message
        };
        return Err(ApiError::Upload(message));
    }
    Ok(Json(
        ApiResponse::ok("Multipart file uploading process is done!").with_data(outcome.data),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    name: String,
}

/// `DELETE /delete?name=<file name>`
pub async fn delete_file(
    State(state): State<AppState>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult {
    let Query(params) = params.map_err(|rejection| malformed(rejection.body_text()))?;
    if params.name.trim().is_empty() {
        return Err(ValidationError::MissingFileName.into());
    }

    let key = object_key(&params.name);
    state
        .store
        .delete_object(&key)
        .await
        .map_err(ApiError::store(DELETE_FAILED))?;

    info!(%key, "deleted file");
    Ok(Json(ApiResponse::ok("File deleting process is done!")))
}

#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    names: Vec<String>,
}

/// `DELETE /delete-multiple` with `{"names": [...]}`.
pub async fn delete_multiple_files(
    State(state): State<AppState>,
    body: Result<Json<DeleteManyRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body.map_err(|rejection| malformed(rejection.body_text()))?;
    let keys = request
        .names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| object_key(name))
        .collect::<Vec<_>>();
    if keys.is_empty() {
        return Err(ValidationError::MissingFileName.into());
    }

    state
        .store
        .delete_objects(&keys)
        .await
        .map_err(ApiError::store(DELETE_FAILED))?;

    info!(count = keys.len(), "deleted files");
    Ok(Json(ApiResponse::ok("Multiple files deleting process is done!")))
}
