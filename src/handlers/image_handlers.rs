//! HTTP handlers for the `/images` API.
//!
//! Bodies are taken as raw bytes and query strings as all-string params so
//! that every malformed input is answered with the JSON `ValidationError`
//! body rather than an extractor rejection.

use crate::{
    errors::AppError,
    models::{
        requests::{
            CompleteUploadRequest, DeleteImageRequest, ListImagesParams, ListImagesRequest,
            UploadUrlRequest,
        },
        responses::{
            CompleteUploadResponse, DeleteImageResponse, DownloadUrlResponse, ListImagesResponse,
            UploadUrlResponse,
        },
    },
    services::{
        ServiceError,
        cursor::{KeyShape, PageCursor},
        metadata_store::OwnerQuery,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use tracing::info;

/// `POST /images/upload-url`
#[tracing::instrument(skip_all)]
pub async fn issue_upload_url(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadUrlResponse>, AppError> {
    let req = UploadUrlRequest::parse(&body, state.max_file_size)?;
    let resp = state.uploads.issue_upload(&req).await?;
    Ok(Json(resp))
}

/// `POST /images/complete`
#[tracing::instrument(skip_all)]
pub async fn complete_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    let req = CompleteUploadRequest::parse(&body)?;
    let resp = state.uploads.complete_upload(req).await?;
    Ok(Json(resp))
}

/// `GET /images/{image_id}/download-url`
#[tracing::instrument(skip(state))]
pub async fn issue_download_url(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<DownloadUrlResponse>, AppError> {
    let resp = state.uploads.issue_download(&image_id).await?;
    Ok(Json(resp))
}

/// `DELETE /images/{image_id}` with body `{"user_id": ...}`.
#[tracing::instrument(skip(state, body))]
pub async fn delete_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    body: Bytes,
) -> Result<Json<DeleteImageResponse>, AppError> {
    let req = DeleteImageRequest::parse(image_id, &body)?;
    let resp = state.deletions.delete(&req.image_id, &req.user_id).await?;
    Ok(Json(resp))
}

/// `GET /images`
///
/// With `user_id` the owner index is queried newest first and the date
/// bounds apply; without it the whole table is scanned and the bounds are
/// ignored. A token only resumes the kind of listing that produced it.
#[tracing::instrument(skip(state))]
pub async fn list_images(
    State(state): State<AppState>,
    params: Result<Query<ListImagesParams>, QueryRejection>,
) -> Result<Json<ListImagesResponse>, AppError> {
    let Query(params) = params?;
    let req = ListImagesRequest::parse(params, state.default_page_size, state.max_page_size)?;

    let shape = if req.user_id.is_some() {
        KeyShape::OwnerIndex
    } else {
        KeyShape::PrimaryKey
    };
    let cursor = req
        .next_token
        .as_deref()
        .map(|token| PageCursor::decode(token, shape))
        .transpose()?;

    let page = match req.user_id.as_deref() {
        Some(owner) => {
            let query = OwnerQuery::new(owner)
                .between(req.start_date.as_deref(), req.end_date.as_deref());
            state
                .records
                .query_by_owner(query, req.limit, cursor.as_ref())
                .await
        }
        None => state.records.scan_all(req.limit, cursor.as_ref()).await,
    }
    .map_err(ServiceError::from)?;

    let next_token = page.next_cursor.as_ref().and_then(PageCursor::encode);
    info!("listed {} images", page.records.len());
    Ok(Json(ListImagesResponse {
        count: page.records.len(),
        has_more: next_token.is_some(),
        next_token,
        images: page.records,
    }))
}
