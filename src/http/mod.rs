//! HTTP surface: file upload and delete routes.

mod handlers;
pub mod validate;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::http::validate::MAX_IMAGE_SIZE;
use crate::s3::{MultipartUploader, ObjectStore, StoreResponse};

/// Prefix under which uploaded files are stored.
pub const OBJECT_PREFIX: &str = "file/";

/// Public path the routes are also mounted under.
pub const VERSIONED_PATH: &str = "/aws-sdk/v3/file";

/// Request body cap for `/upload`: one image plus room for the form framing.
pub const UPLOAD_BODY_LIMIT: usize = MAX_IMAGE_SIZE + 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ObjectStore>,
    uploader: Arc<MultipartUploader>,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let uploader = MultipartUploader::new(Arc::clone(&store));
        Self::with_uploader(store, uploader)
    }

    pub fn with_uploader(store: Arc<dyn ObjectStore>, uploader: MultipartUploader) -> Self {
        Self {
            store,
            uploader: Arc::new(uploader),
        }
    }
}

/// JSON body of every response.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StoreResponse>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<StoreResponse>) -> Self {
        self.data = data;
        self
    }
}

/// Store key for a client-supplied file name. Same name, same key: a second
/// upload replaces the first.
pub fn object_key(file_name: &str) -> String {
    format!("{OBJECT_PREFIX}{file_name}")
}

/// `max_upload_bytes` caps the multipart route only. `/upload` is held to
/// [`UPLOAD_BODY_LIMIT`] and the delete routes keep axum's default.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let files = Router::new()
        .route(
            "/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/upload-multipart",
            post(handlers::upload_multipart_file)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/delete", delete(handlers::delete_file))
        .route("/delete-multiple", delete(handlers::delete_multiple_files));

    Router::new()
        .merge(files.clone())
        .nest(VERSIONED_PATH, files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
