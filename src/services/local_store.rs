//! LocalObjectStore: the object store backing delegated uploads/downloads.
//!
//! Payloads live on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`; a `stored_objects` row in
//! SQLite records what a `HEAD` would report. Clients reach the payloads
//! only through signed credentials issued by this type and checked again by
//! the `/blobs` handlers.

use crate::{
    models::object::StoredObject,
    services::{
        object_store::{ObjectHead, ObjectStore, ObjectStoreError, ObjectStoreResult, UploadGrant},
        signer::{UploadPolicy, UrlSigner},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sqlx::SqlitePool;
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Every key segment becomes a directory or file name on disk.
const MAX_KEY_SEGMENT_LEN: usize = 255;

/// Unreserved characters stay literal, everything else is escaped.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Pool holding the `stored_objects` table.
    pub db: SqlitePool,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,

    /// Externally reachable origin of this service, used in issued URLs.
    public_base_url: String,

    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(
        db: SqlitePool,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
        signer: UrlSigner,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Reject keys that could leave the bucket directory.
    ///
    /// Empty or absolute keys, keys or segments too long for the
    /// filesystem, `.`/`..` segments and control characters are refused.
    fn ensure_key_safe(&self, key: &str) -> ObjectStoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key.starts_with('/')
            || key
                .split('/')
                .any(|seg| seg == "." || seg == ".." || seg.len() > MAX_KEY_SEGMENT_LEN)
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(&self.bucket);
        path
    }

    /// First two bytes of MD5(bucket/key) as hex, to spread files across
    /// directories.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, key: &str) -> ObjectStoreResult<Option<StoredObject>> {
        let object = sqlx::query_as::<_, StoredObject>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM stored_objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(object)
    }

    /// Validate the form fields of a delegated upload against its signed
    /// policy.
    pub fn verify_upload(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> ObjectStoreResult<UploadPolicy> {
        let field = |name: &str| {
            fields.get(name).ok_or_else(|| {
                ObjectStoreError::PolicyViolation(format!("missing form field `{}`", name))
            })
        };

        let policy = self
            .signer
            .verify_policy(field("policy")?, field("signature")?, Utc::now())?;

        if policy.bucket != self.bucket {
            return Err(ObjectStoreError::PolicyViolation(
                "policy was issued for another bucket".into(),
            ));
        }
        if field("key")? != &policy.key {
            return Err(ObjectStoreError::PolicyViolation(
                "form field `key` does not match the policy".into(),
            ));
        }
        if field("Content-Type")? != &policy.content_type {
            return Err(ObjectStoreError::PolicyViolation(
                "form field `Content-Type` does not match the policy".into(),
            ));
        }
        self.ensure_key_safe(&policy.key)?;
        Ok(policy)
    }

    /// Stream a delegated upload to disk and record it.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming, aborting as soon as
    ///   the body outgrows the signed length.
    /// - Refuses a body shorter than the signed length.
    /// - Atomically renames into final location and upserts the row.
    ///
    /// Temp files are removed on every error path.
    pub async fn write_object_stream<S>(
        &self,
        policy: &UploadPolicy,
        stream: S,
    ) -> ObjectStoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let key = policy.key.as_str();
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ObjectStoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            if size_bytes > policy.content_length {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::PolicyViolation(format!(
                    "upload exceeds the signed content length of {} bytes",
                    policy.content_length
                )));
            }
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }
        if size_bytes != policy.content_length {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::PolicyViolation(format!(
                "upload of {} bytes does not match the signed content length of {} bytes",
                size_bytes, policy.content_length
            )));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }

        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO stored_objects (key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(key)
        .bind(&policy.content_type)
        .bind(size_bytes)
        .bind(format!("{:x}", digest.compute()))
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;

        match insert_result {
            Ok(obj) => {
                debug!("stored {} bytes at {}", obj.size_bytes, obj.key);
                Ok(obj)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(ObjectStoreError::Sqlx(err))
            }
        }
    }

    /// Check a download signature and open the payload for streaming.
    pub async fn open_download(
        &self,
        key: &str,
        expires: i64,
        disposition: Option<&str>,
        signature: &str,
    ) -> ObjectStoreResult<(StoredObject, File)> {
        self.signer.verify_download(
            &self.bucket,
            key,
            expires,
            disposition,
            signature,
            Utc::now(),
        )?;
        self.ensure_key_safe(key)?;

        let object = self
            .fetch_object(key)
            .await?
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    fn download_url(&self, key: &str, expires: i64, disposition: Option<&str>) -> String {
        let signature = self
            .signer
            .sign_download(&self.bucket, key, expires, disposition);
        let path = key
            .split('/')
            .map(|seg| utf8_percent_encode(seg, URL_COMPONENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let mut url = format!(
            "{}/blobs/{}/{}?expires={}&signature={}",
            self.public_base_url,
            utf8_percent_encode(&self.bucket, URL_COMPONENT),
            path,
            expires,
            signature
        );
        if let Some(disposition) = disposition {
            url.push_str("&disposition=");
            url.push_str(&utf8_percent_encode(disposition, URL_COMPONENT).to_string());
        }
        url
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// An object exists when both its row and its payload file do.
    async fn head(&self, key: &str) -> ObjectStoreResult<Option<ObjectHead>> {
        self.ensure_key_safe(key)?;
        let Some(object) = self.fetch_object(key).await? else {
            return Ok(None);
        };

        match fs::metadata(self.object_path(key)).await {
            Ok(_) => Ok(Some(ObjectHead {
                content_type: object.content_type,
                content_length: object.size_bytes,
                etag: object.etag,
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("row for {} has no payload on disk", key);
                Ok(None)
            }
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        ttl: Duration,
    ) -> ObjectStoreResult<UploadGrant> {
        self.ensure_key_safe(key)?;
        let policy = UploadPolicy {
            expiration: Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            content_length,
        };
        let (encoded, signature) = self.signer.sign_policy(&policy)?;

        let fields = BTreeMap::from([
            ("key".to_string(), policy.key),
            ("Content-Type".to_string(), policy.content_type),
            ("policy".to_string(), encoded),
            ("signature".to_string(), signature),
        ]);

        debug!("issued upload policy for {}", key);
        Ok(UploadGrant {
            url: format!(
                "{}/blobs/{}",
                self.public_base_url,
                utf8_percent_encode(&self.bucket, URL_COMPONENT)
            ),
            fields,
        })
    }

    async fn presign_download(
        &self,
        key: &str,
        filename: Option<&str>,
        ttl: Duration,
    ) -> ObjectStoreResult<String> {
        self.ensure_key_safe(key)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let disposition = filename.map(attachment_disposition);
        Ok(self.download_url(key, expires, disposition.as_deref()))
    }

    /// Delete the row and the payload, then prune emptied shard
    /// directories. Missing objects are not an error.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        self.ensure_key_safe(key)?;
        sqlx::query("DELETE FROM stored_objects WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }

        Ok(())
    }
}

/// `attachment; filename="..."` with characters that would break the
/// quoted string replaced. Names outside ASCII also get an RFC 5987
/// `filename*` so the header value stays ASCII.
fn attachment_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if !c.is_ascii() || c == '"' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if filename.is_ascii() {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            utf8_percent_encode(filename, URL_COMPONENT)
        )
    }
}
