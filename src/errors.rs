use crate::{
    models::requests::ValidationError,
    services::{
        ServiceError, cursor::CursorError, metadata_store::StoreError,
        object_store::ObjectStoreError,
    },
};
use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;
use tracing::{error, warn};

/// Error kinds exposed in the `error` field of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Unauthorized,
    InternalError,
    /// Reserved for upstream throttling; nothing raises it yet.
    ThrottleError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::ThrottleError => "ThrottleError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ThrottleError => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Error answered to the client as `{error, message, details?}`.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, msg)
    }

    /// Generic 500. The cause should already be logged.
    pub fn internal() -> Self {
        Self::new(ErrorKind::InternalError, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }

        (self.kind.status(), Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        warn!("rejected request: {}", err);
        let app = AppError::validation(err.message.clone());
        if err.errors.is_empty() {
            app
        } else {
            app.with_details(json!({ "errors": err.errors }))
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(err) => err.into(),
            ServiceError::NotFound(msg) => AppError::not_found(msg),
            ServiceError::Unauthorized(msg) => AppError::unauthorized(msg),
            ServiceError::Cursor(err) | ServiceError::Store(StoreError::Cursor(err)) => err.into(),
            ServiceError::Store(err) => {
                error!("metadata store failure: {}", err);
                AppError::internal()
            }
            ServiceError::ObjectStore(ObjectStoreError::InvalidKey) => {
                AppError::validation("Invalid object key")
            }
            ServiceError::ObjectStore(err) => {
                error!("object store failure: {}", err);
                AppError::internal()
            }
        }
    }
}

impl From<CursorError> for AppError {
    fn from(err: CursorError) -> Self {
        warn!("rejected pagination token: {}", err);
        AppError::validation("Invalid pagination token")
    }
}

/// Used by the `/blobs` endpoints, where the store is talked to directly.
impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(key) => {
                AppError::not_found(format!("Object not found: {}", key))
            }
            ObjectStoreError::InvalidKey => AppError::validation("Invalid object key"),
            ObjectStoreError::InvalidSignature | ObjectStoreError::Expired => {
                warn!("refused delegated request: {}", err);
                AppError::unauthorized(err.to_string())
            }
            ObjectStoreError::PolicyViolation(msg) => {
                warn!("upload violates policy: {}", msg);
                AppError::validation(msg)
            }
            ObjectStoreError::Backend(_) | ObjectStoreError::Sqlx(_) | ObjectStoreError::Io(_) => {
                error!("object store failure: {}", err);
                AppError::internal()
            }
        }
    }
}

/// Query strings serde cannot map onto the params struct, such as a
/// repeated key.
impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        warn!("rejected query string: {}", rejection.body_text());
        AppError::validation("Invalid request parameters").with_details(json!({
            "errors": [{ "field": "query", "message": rejection.body_text() }],
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!("unexpected failure: {:#}", err);
        AppError::internal()
    }
}
