//! Represents the metadata record kept for every stored image.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

/// MIME types accepted for uploads.
pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// Lifecycle state of an upload.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Completed,
    Failed,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Completed => "completed",
            ImageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "completed" => Ok(ImageStatus::Completed),
            "failed" => Ok(ImageStatus::Failed),
            other => Err(format!("unknown image status `{}`", other)),
        }
    }
}

/// A single image's metadata.
///
/// The payload bytes live in the object store under `storage_key`; this
/// struct only describes them. Wire names follow the public API
/// (`user_id`, `s3_key`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    /// Primary key (UUID v4 string).
    pub image_id: String,

    /// Principal that uploaded the image.
    #[serde(rename = "user_id")]
    pub owner_id: String,

    /// Original filename as supplied by the client.
    pub filename: String,

    /// MIME type reported by the object store at commit time.
    pub content_type: String,

    /// Size in bytes.
    pub file_size: i64,

    /// Commit time in canonical form, see [`canonical_timestamp`].
    pub upload_timestamp: String,

    pub tags: Option<Vec<String>>,

    pub description: Option<String>,

    pub status: ImageStatus,

    /// Object-store key, `images/{owner}/{image_id}_{sanitized filename}`.
    #[serde(rename = "s3_key")]
    pub storage_key: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Raw table row. `tags` is stored as a JSON array and `status` as text.
#[derive(FromRow, Debug)]
pub struct ImageRow {
    pub image_id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub upload_timestamp: String,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = String;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let tags = row
            .tags
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .map_err(|err| format!("tags column is not a JSON string array: {}", err))?;
        let status = row.status.parse::<ImageStatus>()?;

        Ok(ImageRecord {
            image_id: row.image_id,
            owner_id: row.owner_id,
            filename: row.filename,
            content_type: row.content_type,
            file_size: row.file_size,
            upload_timestamp: row.upload_timestamp,
            tags,
            description: row.description,
            status,
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Whether `content_type` is one of [`ALLOWED_CONTENT_TYPES`].
pub fn is_allowed_content_type(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Render a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
///
/// Fixed width and always UTC, so lexicographic order of the strings is
/// chronological order. Every indexed `upload_timestamp` uses this form.
pub fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
