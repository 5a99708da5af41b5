//! Shared handles injected into every handler.

use crate::{
    config::AppConfig,
    db::TableNames,
    services::{
        deletion_service::DeletionCoordinator, local_store::LocalObjectStore,
        metadata_store::MetadataStore, object_store::ObjectStore, signer::UrlSigner,
        upload_service::UploadCoordinator,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub records: MetadataStore,
    pub uploads: UploadCoordinator,
    pub deletions: DeletionCoordinator,
    /// Serves the `/blobs` endpoints. Flows go through `ObjectStore` instead.
    pub blobs: LocalObjectStore,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_file_size: i64,
}

impl AppState {
    /// Wire every component against the local object store.
    pub fn new(cfg: &AppConfig, db: SqlitePool, names: TableNames) -> Self {
        let blobs = LocalObjectStore::new(
            db.clone(),
            &cfg.storage_dir,
            &cfg.bucket_name,
            &cfg.public_base_url,
            UrlSigner::new(&cfg.signing_secret),
        );
        Self::with_object_store(cfg, MetadataStore::new(db, names), blobs.clone(), Arc::new(blobs))
    }

    /// Same as [`AppState::new`] but with the coordinators talking to
    /// `objects`, which may wrap `blobs`.
    pub fn with_object_store(
        cfg: &AppConfig,
        records: MetadataStore,
        blobs: LocalObjectStore,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            uploads: UploadCoordinator::new(
                objects.clone(),
                records.clone(),
                cfg.upload_url_ttl,
                cfg.download_url_ttl,
            ),
            deletions: DeletionCoordinator::new(objects, records.clone()),
            records,
            blobs,
            default_page_size: cfg.default_page_size,
            max_page_size: cfg.max_page_size,
            max_file_size: cfg.max_file_size,
        }
    }
}
