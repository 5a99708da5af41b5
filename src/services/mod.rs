//! Service layer: persistence, object storage and the request flows built
//! on top of them.

use crate::models::requests::ValidationError;
use thiserror::Error;

pub mod cursor;
pub mod deletion_service;
pub mod local_store;
pub mod metadata_store;
pub mod object_store;
pub mod ownership;
pub mod signer;
pub mod upload_service;

/// Failure of a request flow, translated to HTTP in `errors`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Cursor(#[from] cursor::CursorError),
    #[error(transparent)]
    Store(#[from] metadata_store::StoreError),
    #[error(transparent)]
    ObjectStore(#[from] object_store::ObjectStoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
