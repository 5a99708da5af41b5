//! Common test utilities: an in-process server over temp storage and
//! request helpers.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use chrono::{DateTime, Utc};
use image_vault::{
    build_app,
    config::AppConfig,
    db::{self, TableNames},
    models::image::{ImageRecord, ImageStatus, canonical_timestamp},
    services::{
        local_store::LocalObjectStore,
        metadata_store::MetadataStore,
        object_store::{ObjectHead, ObjectStore, ObjectStoreError, ObjectStoreResult, UploadGrant},
        signer::UrlSigner,
    },
    state::AppState,
};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PUBLIC_BASE_URL: &str = "http://vault.test";
pub const BOUNDARY: &str = "image-vault-test-boundary";

/// Object store that forwards to the local store but can be told to fail
/// deletes.
#[allow(dead_code)]
pub struct FlakyObjectStore {
    inner: LocalObjectStore,
    pub fail_deletes: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn head(&self, key: &str) -> ObjectStoreResult<Option<ObjectHead>> {
        self.inner.head(key).await
    }

    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        content_length: i64,
        ttl: Duration,
    ) -> ObjectStoreResult<UploadGrant> {
        self.inner
            .presign_upload(key, content_type, content_length, ttl)
            .await
    }

    async fn presign_download(
        &self,
        key: &str,
        filename: Option<&str>,
        ttl: Duration,
    ) -> ObjectStoreResult<String> {
        self.inner.presign_download(key, filename, ttl).await
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend("injected delete failure".into()));
        }
        self.inner.delete(key).await
    }
}

/// A test server wrapper with all dependencies.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub records: MetadataStore,
    pub blobs: LocalObjectStore,
    pub objects: Arc<FlakyObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("objects");
        std::fs::create_dir_all(&storage_dir).expect("Failed to create storage directory");
        let db_url = format!("sqlite://{}", temp_dir.path().join("meta.db").display());

        let cfg = AppConfig {
            storage_dir: storage_dir.display().to_string(),
            database_url: db_url.clone(),
            public_base_url: PUBLIC_BASE_URL.into(),
            signing_secret: "test-signing-secret".into(),
            ..AppConfig::default()
        };

        let names = TableNames::default();
        let pool = db::connect(&db_url, 5).await.expect("Failed to open database");
        db::apply_schema(&pool, &names)
            .await
            .expect("Failed to apply schema");

        let records = MetadataStore::new(pool.clone(), names.clone());
        let blobs = LocalObjectStore::new(
            pool.clone(),
            &cfg.storage_dir,
            &cfg.bucket_name,
            &cfg.public_base_url,
            UrlSigner::new(&cfg.signing_secret),
        );
        let objects = Arc::new(FlakyObjectStore {
            inner: blobs.clone(),
            fail_deletes: AtomicBool::new(false),
        });

        let state = AppState::with_object_store(&cfg, records.clone(), blobs.clone(), objects.clone());
        Self {
            router: build_app(state),
            records,
            blobs,
            objects,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and return status, headers and raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    /// JSON request helper. `uri` may be absolute under [`PUBLIC_BASE_URL`].
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(local_path(uri));
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST a file to an issued upload target, the way a browser form would.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &BTreeMap<String, String>,
        file: &[u8],
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(local_path(url))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(fields, file)))
            .unwrap();

        let (status, _, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Run the issue-upload / form POST / complete sequence for `owner`.
    /// Returns the `image_id`.
    pub async fn upload_image(&self, owner: &str, filename: &str, file: &[u8]) -> String {
        let (status, issued) = self
            .json(
                "POST",
                "/images/upload-url",
                Some(serde_json::json!({
                    "user_id": owner,
                    "filename": filename,
                    "content_type": "image/png",
                    "file_size": file.len(),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{issued}");

        let fields: BTreeMap<String, String> =
            serde_json::from_value(issued["fields"].clone()).unwrap();
        let (status, _) = self
            .post_form(issued["presigned_url"].as_str().unwrap(), &fields, file)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let image_id = issued["image_id"].as_str().unwrap().to_string();
        let (status, done) = self
            .json(
                "POST",
                "/images/complete",
                Some(serde_json::json!({
                    "image_id": image_id,
                    "user_id": owner,
                    "filename": filename,
                    "content_type": "image/png",
                    "file_size": file.len(),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{done}");
        image_id
    }

    /// Insert a completed record directly, bypassing the upload flow.
    pub async fn seed(&self, image_id: &str, owner: &str, at: DateTime<Utc>) {
        let now = Utc::now();
        self.records
            .put(&ImageRecord {
                image_id: image_id.into(),
                owner_id: owner.into(),
                filename: format!("{image_id}.png"),
                content_type: "image/png".into(),
                file_size: 1,
                upload_timestamp: canonical_timestamp(at),
                tags: None,
                description: None,
                status: ImageStatus::Completed,
                storage_key: format!("images/{owner}/{image_id}_{image_id}.png"),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("Failed to seed record");
    }
}

/// Strip the public origin from an issued URL.
pub fn local_path(url: &str) -> &str {
    url.strip_prefix(PUBLIC_BASE_URL).unwrap_or(url)
}

pub fn multipart_body(fields: &BTreeMap<String, String>, file: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"upload\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}
