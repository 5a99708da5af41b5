//! Represents a payload held by the local object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Bookkeeping row for one stored payload.
///
/// The bytes themselves live on disk; this struct mirrors what an S3
/// `HeadObject` would report for them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Object key (path-like, e.g. `images/u1/<id>_photo.jpg`).
    pub key: String,

    /// Content type fixed by the upload policy.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the payload was last written.
    pub last_modified: DateTime<Utc>,
}
