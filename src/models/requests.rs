//! Request bodies and their validation.
//!
//! Every flow starts by turning raw input into one of the validated structs
//! below. Raw bodies keep every field optional so that missing or mistyped
//! fields are reported as `ValidationError` details instead of extractor
//! rejections.

use crate::models::image::{canonical_timestamp, is_allowed_content_type, ALLOWED_CONTENT_TYPES};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use uuid::Uuid;

pub const MAX_DESCRIPTION_LEN: usize = 500;
/// `user_id` is one storage-key segment and one directory name on disk.
pub const MAX_USER_ID_LEN: usize = 255;

/// One offending field.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Client input that failed validation.
#[derive(Debug)]
pub struct ValidationError {
    pub message: String,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    fn with_errors(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }

    /// Whether any error names `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for err in &self.errors {
            write!(f, "; {}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Deserialize, Debug, Default)]
struct UploadUrlBody {
    user_id: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    file_size: Option<i64>,
    tags: Option<Vec<String>>,
    description: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct CompleteUploadBody {
    image_id: Option<String>,
    user_id: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    file_size: Option<i64>,
    tags: Option<Vec<String>>,
    description: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct DeleteImageBody {
    user_id: Option<String>,
}

/// `POST /images/upload-url`
#[derive(Debug, Clone)]
pub struct UploadUrlRequest {
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

impl UploadUrlRequest {
    /// Validate a JSON body. `file_size` must be in `1..=max_file_size`.
    pub fn parse(body: &[u8], max_file_size: i64) -> Result<Self, ValidationError> {
        let raw: UploadUrlBody = parse_json(body)?;
        let mut errors = Vec::new();

        let user_id = check_user_id(raw.user_id, &mut errors);
        let filename = required_text("filename", raw.filename, &mut errors);
        let content_type = check_content_type(raw.content_type, &mut errors);
        let file_size = check_file_size(raw.file_size, Some(max_file_size), &mut errors);
        check_description(raw.description.as_deref(), &mut errors);

        match (user_id, filename, content_type, file_size) {
            (Some(user_id), Some(filename), Some(content_type), Some(file_size))
                if errors.is_empty() =>
            {
                Ok(Self {
                    user_id,
                    filename,
                    content_type,
                    file_size,
                    tags: raw.tags,
                    description: raw.description,
                })
            }
            _ => Err(ValidationError::with_errors("Invalid request data", errors)),
        }
    }
}

/// `POST /images/complete`
#[derive(Debug, Clone)]
pub struct CompleteUploadRequest {
    pub image_id: String,
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

impl CompleteUploadRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ValidationError> {
        let raw: CompleteUploadBody = parse_json(body)?;
        let mut errors = Vec::new();

        let image_id = check_image_id(raw.image_id, &mut errors);
        let user_id = check_user_id(raw.user_id, &mut errors);
        let filename = required_text("filename", raw.filename, &mut errors);
        let content_type = check_content_type(raw.content_type, &mut errors);
        let file_size = check_file_size(raw.file_size, None, &mut errors);
        check_description(raw.description.as_deref(), &mut errors);

        match (image_id, user_id, filename, content_type, file_size) {
            (Some(image_id), Some(user_id), Some(filename), Some(content_type), Some(file_size))
                if errors.is_empty() =>
            {
                Ok(Self {
                    image_id,
                    user_id,
                    filename,
                    content_type,
                    file_size,
                    tags: raw.tags,
                    description: raw.description,
                })
            }
            _ => Err(ValidationError::with_errors("Invalid request data", errors)),
        }
    }
}

/// `DELETE /images/{image_id}`
#[derive(Debug, Clone)]
pub struct DeleteImageRequest {
    pub image_id: String,
    pub user_id: String,
}

impl DeleteImageRequest {
    pub fn parse(image_id: String, body: &[u8]) -> Result<Self, ValidationError> {
        if image_id.trim().is_empty() {
            return Err(ValidationError::new("Missing image_id in path"));
        }
        let raw: DeleteImageBody = parse_json(body)?;
        match raw.user_id {
            Some(user_id) if !user_id.is_empty() => Ok(Self { image_id, user_id }),
            _ => Err(ValidationError::new("Missing user_id in request body")),
        }
    }
}

/// Raw query string of `GET /images`.
#[derive(Deserialize, Debug, Default)]
pub struct ListImagesParams {
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
    pub next_token: Option<String>,
}

/// Validated listing request. Date bounds are already in canonical
/// timestamp form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListImagesRequest {
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: u32,
    pub next_token: Option<String>,
}

impl ListImagesRequest {
    pub fn parse(
        params: ListImagesParams,
        default_limit: u32,
        max_limit: u32,
    ) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();

        let limit = match params.limit.as_deref().map(str::trim) {
            None | Some("") => default_limit,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if (1..=max_limit).contains(&n) => n,
                _ => {
                    errors.push(field_error(
                        "limit",
                        format!("must be an integer between 1 and {}", max_limit),
                    ));
                    default_limit
                }
            },
        };

        let start_date = params
            .start_date
            .filter(|s| !s.is_empty())
            .and_then(|s| check_date("start_date", &s, BoundSide::Start, &mut errors));
        let end_date = params
            .end_date
            .filter(|s| !s.is_empty())
            .and_then(|s| check_date("end_date", &s, BoundSide::End, &mut errors));

        if let (Some(start), Some(end)) = (&start_date, &end_date) {
            if start > end {
                errors.push(field_error("start_date", "must not be after end_date"));
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError::with_errors(
                "Invalid request parameters",
                errors,
            ));
        }

        Ok(Self {
            user_id: params.user_id.filter(|s| !s.is_empty()),
            start_date,
            end_date,
            limit,
            next_token: params.next_token.filter(|s| !s.is_empty()),
        })
    }
}

/// Which end of a range a date bound closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Start,
    End,
}

/// Normalize an ISO-8601 bound to the canonical timestamp form.
///
/// Accepts RFC 3339, a naive date-time (read as UTC) or a bare date. A bare
/// end date is widened to the last microsecond of that day.
pub fn normalize_date_bound(value: &str, side: BoundSide) -> Option<String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(canonical_timestamp(at.with_timezone(&Utc)));
    }
    if let Ok(naive) = value.parse::<NaiveDateTime>() {
        return Some(canonical_timestamp(naive.and_utc()));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let naive = match side {
        BoundSide::Start => date.and_hms_opt(0, 0, 0)?,
        BoundSide::End => date.and_hms_micro_opt(23, 59, 59, 999_999)?,
    };
    Some(canonical_timestamp(naive.and_utc()))
}

fn parse_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        ValidationError::with_errors(
            "Invalid request data",
            vec![field_error("body", err.to_string())],
        )
    })
}

fn field_error(field: &str, message: impl Into<String>) -> FieldError {
    FieldError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn required_text(
    field: &str,
    value: Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match value {
        None => {
            errors.push(field_error(field, "field required"));
            None
        }
        Some(v) if v.is_empty() => {
            errors.push(field_error(field, "must not be empty"));
            None
        }
        Some(v) => Some(v),
    }
}

/// `user_id` becomes a storage-key segment, so separators and dot segments
/// are refused and its length is bounded.
fn check_user_id(value: Option<String>, errors: &mut Vec<FieldError>) -> Option<String> {
    let user_id = required_text("user_id", value, errors)?;
    if user_id.len() > MAX_USER_ID_LEN {
        errors.push(field_error(
            "user_id",
            format!("must be at most {} bytes", MAX_USER_ID_LEN),
        ));
        return None;
    }
    if user_id == "."
        || user_id == ".."
        || user_id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    {
        errors.push(field_error(
            "user_id",
            "must not contain path separators or control characters",
        ));
        return None;
    }
    Some(user_id)
}

fn check_image_id(value: Option<String>, errors: &mut Vec<FieldError>) -> Option<String> {
    let image_id = required_text("image_id", value, errors)?;
    if Uuid::parse_str(&image_id).is_err() {
        errors.push(field_error("image_id", "must be a UUID"));
        return None;
    }
    Some(image_id)
}

fn check_content_type(value: Option<String>, errors: &mut Vec<FieldError>) -> Option<String> {
    let content_type = required_text("content_type", value, errors)?;
    if !is_allowed_content_type(&content_type) {
        errors.push(field_error(
            "content_type",
            format!(
                "Content type must be one of {}",
                ALLOWED_CONTENT_TYPES.join(", ")
            ),
        ));
        return None;
    }
    Some(content_type)
}

fn check_file_size(
    value: Option<i64>,
    max: Option<i64>,
    errors: &mut Vec<FieldError>,
) -> Option<i64> {
    let Some(size) = value else {
        errors.push(field_error("file_size", "field required"));
        return None;
    };
    if size <= 0 {
        errors.push(field_error("file_size", "must be greater than 0"));
        return None;
    }
    if let Some(max) = max {
        if size > max {
            errors.push(field_error(
                "file_size",
                format!("must be less than or equal to {}", max),
            ));
            return None;
        }
    }
    Some(size)
}

fn check_description(value: Option<&str>, errors: &mut Vec<FieldError>) {
    if let Some(description) = value {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(field_error(
                "description",
                format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
            ));
        }
    }
}

fn check_date(
    field: &str,
    value: &str,
    side: BoundSide,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let normalized = normalize_date_bound(value, side);
    if normalized.is_none() {
        errors.push(field_error(field, "Date must be in ISO 8601 format"));
    }
    normalized
}
