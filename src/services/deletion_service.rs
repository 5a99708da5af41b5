use crate::{
    models::responses::DeleteImageResponse,
    services::{
        ServiceError, ServiceResult, metadata_store::MetadataStore, object_store::ObjectStore,
        ownership,
    },
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owner-checked removal of an image's object and record.
#[derive(Clone)]
pub struct DeletionCoordinator {
    objects: Arc<dyn ObjectStore>,
    records: MetadataStore,
}

impl DeletionCoordinator {
    pub fn new(objects: Arc<dyn ObjectStore>, records: MetadataStore) -> Self {
        Self { objects, records }
    }

    /// A failed object delete is logged and does not block removing the
    /// record; the orphaned object is left for manual cleanup.
    pub async fn delete(&self, image_id: &str, caller: &str) -> ServiceResult<DeleteImageResponse> {
        let record = self
            .records
            .get(image_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Image not found: {}", image_id)))?;

        if !ownership::authorize(&record.owner_id, caller) {
            warn!("user {} may not delete image {}", caller, image_id);
            return Err(ServiceError::Unauthorized(
                "You don't have permission to delete this image".into(),
            ));
        }

        if let Err(err) = self.objects.delete(&record.storage_key).await {
            error!(
                "failed to delete object {} for image {}: {}",
                record.storage_key, image_id, err
            );
        }

        self.records.delete(image_id).await?;

        info!("deleted image {}", image_id);
        Ok(DeleteImageResponse {
            image_id: record.image_id,
            status: "deleted".into(),
            message: "Image deleted successfully".into(),
        })
    }
}
