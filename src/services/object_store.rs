//! Object-store contract used by the coordinators.
//!
//! The API tier never proxies payload bytes. It only checks for objects,
//! reads their metadata, deletes them, and hands out time-limited
//! credentials that let clients talk to the store directly.

use async_trait::async_trait;
use std::{collections::BTreeMap, io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key")]
    InvalidKey,
    #[error("request signature is invalid")]
    InvalidSignature,
    #[error("request credential has expired")]
    Expired,
    #[error("{0}")]
    PolicyViolation(String),
    #[error("object store backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// What the store reports about an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_type: String,
    pub content_length: i64,
    pub etag: String,
}

/// Delegated upload credential: a form POST target plus the fields the
/// client must send along with the file.
#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata of the object at `key`, `None` when absent.
    async fn head(&self, key: &str) -> ObjectStoreResult<Option<ObjectHead>>;

    async fn exists(&self, key: &str) -> ObjectStoreResult<bool> {
        Ok(self.head(key).await?.is_some())
    }

    /// Credential to write exactly one object: `key`, with `content_type`
    /// and a body of exactly `content_length` bytes.
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        ttl: Duration,
    ) -> ObjectStoreResult<UploadGrant>;

    /// URL to read `key`. `filename` becomes an attachment
    /// content-disposition hint.
    async fn presign_download(
        &self,
        key: &str,
        filename: Option<&str>,
        ttl: Duration,
    ) -> ObjectStoreResult<String>;

    /// Remove the object. Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()>;
}
