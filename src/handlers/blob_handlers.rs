//! Delegated upload/download targets of the local object store.
//!
//! These endpoints are what issued credentials point at. They trust nothing
//! but the signature: an upload must match its signed policy exactly and a
//! download must carry a valid, unexpired signature over key and
//! disposition. Bodies are streamed in both directions.

use crate::{errors::AppError, models::object::StoredObject, state::AppState};
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::{collections::BTreeMap, io};
use tokio_util::io::ReaderStream;
use tracing::info;

/// Query of a signed download URL. Everything is optional so a missing
/// parameter is reported as an authorization failure.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: Option<String>,
    pub disposition: Option<String>,
    pub signature: Option<String>,
}

/// Upload an object with a browser-style form POST to `/blobs/{bucket}`.
///
/// Text fields (`key`, `Content-Type`, `policy`, `signature`) must precede
/// the `file` part; fields after it are ignored.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_blob(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    if bucket != state.blobs.bucket() {
        return Err(AppError::not_found(format!("Bucket not found: {}", bucket)));
    }

    let mut fields = BTreeMap::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" {
            let value = field.text().await.map_err(malformed)?;
            fields.insert(name, value);
            continue;
        }

        let policy = state.blobs.verify_upload(&fields)?;
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let object = state.blobs.write_object_stream(&policy, stream).await?;

        info!("received {} bytes for {}", object.size_bytes, object.key);
        let mut response = StatusCode::NO_CONTENT.into_response();
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", object.etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
        return Ok(response);
    }

    Err(AppError::validation("missing form field `file`"))
}

/// Download `/blobs/{bucket}/{*key}` as a streaming response.
#[tracing::instrument(skip(state, query))]
pub async fn download_blob(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    if bucket != state.blobs.bucket() {
        return Err(AppError::not_found(format!("Bucket not found: {}", bucket)));
    }
    let Query(query) = query?;
    let (Some(expires), Some(signature)) = (query.expires.as_deref(), query.signature.as_deref())
    else {
        return Err(AppError::unauthorized("missing download signature"));
    };
    let expires = expires
        .parse::<i64>()
        .map_err(|_| AppError::unauthorized("malformed download expiry"))?;

    let (meta, file) = state
        .blobs
        .open_download(&key, expires, query.disposition.as_deref(), signature)
        .await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, query.disposition.as_deref());

    Ok(response)
}

fn malformed(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::validation(format!("malformed multipart body: {}", err))
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject, disposition: Option<&str>) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Some(value) = disposition.and_then(|d| HeaderValue::from_str(d).ok()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
