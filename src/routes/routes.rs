//! Defines routes for the image API and the delegated object endpoints.
//!
//! ## Structure
//! - **Image endpoints**
//!   - `POST   /images/upload-url`: issue an upload credential
//!   - `POST   /images/complete`: commit metadata after upload
//!   - `GET    /images/{image_id}/download-url`: issue a download URL
//!   - `DELETE /images/{image_id}`: owner-checked delete
//!   - `GET    /images`: list, by owner or whole table
//!
//! - **Blob endpoints** (targets of issued credentials)
//!   - `POST   /blobs/{bucket}`: multipart upload with signed policy
//!   - `GET    /blobs/{bucket}/{*key}`: signed download
//!
//! The wildcard `*key` allows nested keys like `images/u1/<id>_photo.jpg`.

use crate::{
    handlers::{
        blob_handlers::{download_blob, upload_blob},
        health_handlers::{healthz, readyz},
        image_handlers::{
            complete_upload, delete_image, issue_download_url, issue_upload_url, list_images,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};

/// Room for the multipart framing and policy fields around the file part.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Build the router for all routes.
///
/// `max_file_size` raises the body limit of the upload target above
/// axum's default so that the largest allowed image fits.
pub fn routes(max_file_size: i64) -> Router<AppState> {
    let upload_limit = usize::try_from(max_file_size).unwrap_or(usize::MAX / 2) + FORM_OVERHEAD;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // image API
        .route("/images", get(list_images))
        .route("/images/upload-url", post(issue_upload_url))
        .route("/images/complete", post(complete_upload))
        .route("/images/{image_id}", delete(delete_image))
        .route("/images/{image_id}/download-url", get(issue_download_url))
        // delegated object endpoints
        .route(
            "/blobs/{bucket}",
            post(upload_blob).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/blobs/{bucket}/{*key}", get(download_blob))
        .layer(cors)
}
