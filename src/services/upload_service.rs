//! Two-phase upload protocol and download credentials.
//!
//! Phase one hands the client a credential to write one object directly to
//! the object store and persists nothing. Phase two checks that the object
//! landed and only then writes the metadata record, so a record never points
//! at a missing object at commit time.

use crate::{
    models::{
        image::{ImageRecord, ImageStatus, canonical_timestamp},
        requests::{CompleteUploadRequest, UploadUrlRequest},
        responses::{CompleteUploadResponse, DownloadUrlResponse, UploadUrlResponse},
    },
    services::{ServiceError, ServiceResult, metadata_store::MetadataStore, object_store::ObjectStore},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use uuid::Uuid;

const MAX_FILENAME_LEN: usize = 255;
/// The last key segment, `{image_id}_{filename}`, is a file name on disk.
const MAX_KEY_SEGMENT_LEN: usize = 255;

#[derive(Clone)]
pub struct UploadCoordinator {
    objects: Arc<dyn ObjectStore>,
    records: MetadataStore,
    upload_ttl: Duration,
    download_ttl: Duration,
}

impl UploadCoordinator {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: MetadataStore,
        upload_ttl: Duration,
        download_ttl: Duration,
    ) -> Self {
        Self {
            objects,
            records,
            upload_ttl,
            download_ttl,
        }
    }

    /// Reserve an `image_id` and issue an upload grant for its storage key.
    pub async fn issue_upload(&self, req: &UploadUrlRequest) -> ServiceResult<UploadUrlResponse> {
        let image_id = Uuid::new_v4().to_string();
        let key = storage_key(&req.user_id, &image_id, &req.filename);

        let grant = self
            .objects
            .presign_upload(&key, &req.content_type, req.file_size, self.upload_ttl)
            .await?;

        info!("issued upload grant for image {} ({})", image_id, key);
        Ok(UploadUrlResponse {
            image_id,
            presigned_url: grant.url,
            fields: grant.fields,
            expires_in: self.upload_ttl.as_secs(),
            s3_key: key,
        })
    }

    /// Commit metadata for an object the client has already uploaded.
    ///
    /// Safe to retry: the record is overwritten with the same key.
    pub async fn complete_upload(
        &self,
        req: CompleteUploadRequest,
    ) -> ServiceResult<CompleteUploadResponse> {
        let key = storage_key(&req.user_id, &req.image_id, &req.filename);

        let Some(head) = self.objects.head(&key).await? else {
            return Err(ServiceError::NotFound(
                "Image not uploaded to S3. Please upload the file first.".into(),
            ));
        };

        let now = Utc::now();
        let record = ImageRecord {
            image_id: req.image_id,
            owner_id: req.user_id,
            filename: req.filename,
            content_type: if head.content_type.is_empty() {
                req.content_type
            } else {
                head.content_type
            },
            file_size: if head.content_length > 0 {
                head.content_length
            } else {
                req.file_size
            },
            upload_timestamp: canonical_timestamp(now),
            tags: req.tags,
            description: req.description,
            status: ImageStatus::Completed,
            storage_key: key,
            created_at: now,
            updated_at: now,
        };
        let stored = self.records.put(&record).await?;

        info!("completed upload of image {}", stored.image_id);
        Ok(CompleteUploadResponse {
            image_id: stored.image_id,
            status: stored.status.to_string(),
            message: "Image upload completed successfully".into(),
        })
    }

    /// Issue a time-limited download URL for a committed image.
    pub async fn issue_download(&self, image_id: &str) -> ServiceResult<DownloadUrlResponse> {
        let record = self
            .records
            .get(image_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Image not found: {}", image_id)))?;

        if !self.objects.exists(&record.storage_key).await? {
            error!(
                "record {} points at missing object {}",
                record.image_id, record.storage_key
            );
            return Err(ServiceError::NotFound(
                "Image file not found in storage".into(),
            ));
        }

        let url = self
            .objects
            .presign_download(
                &record.storage_key,
                Some(&record.filename),
                self.download_ttl,
            )
            .await?;

        info!("issued download url for image {}", record.image_id);
        Ok(DownloadUrlResponse {
            image_id: record.image_id,
            presigned_url: url,
            expires_in: self.download_ttl.as_secs(),
            filename: record.filename,
            content_type: record.content_type,
        })
    }
}

/// `images/{owner}/{image_id}_{sanitized filename}`
///
/// The filename is trimmed further when needed so that the last segment
/// stays within 255 bytes.
pub fn storage_key(owner_id: &str, image_id: &str, filename: &str) -> String {
    let room = MAX_KEY_SEGMENT_LEN.saturating_sub(image_id.len() + 1).max(1);
    format!(
        "images/{}/{}_{}",
        owner_id,
        image_id,
        fit_name(sanitize_filename(filename), room)
    )
}

/// Reduce a client filename to a single safe path segment.
///
/// Keeps the last component after `/` or `\`, maps anything outside
/// `[A-Za-z0-9._-]` to `_` and caps the length at 255, trimming the stem
/// before the extension.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() || safe == "." || safe == ".." {
        safe = "file".into();
    }

    fit_name(safe, MAX_FILENAME_LEN)
}

/// Cap an ASCII name at `max` bytes, trimming the stem before the extension.
fn fit_name(name: String, max: usize) -> String {
    if name.len() <= max {
        return name;
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < max => {
            let ext = &name[dot..];
            format!("{}{}", &name[..max - ext.len()], ext)
        }
        _ => name[..max].to_string(),
    }
}
