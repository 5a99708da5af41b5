//! Response bodies of the `/images` API.

use crate::models::image::ImageRecord;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug)]
pub struct UploadUrlResponse {
    pub image_id: String,
    pub presigned_url: String,
    pub fields: BTreeMap<String, String>,
    pub expires_in: u64,
    pub s3_key: String,
}

#[derive(Serialize, Debug)]
pub struct DownloadUrlResponse {
    pub image_id: String,
    pub presigned_url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: String,
}

#[derive(Serialize, Debug)]
pub struct CompleteUploadResponse {
    pub image_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct DeleteImageResponse {
    pub image_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct ListImagesResponse {
    pub images: Vec<ImageRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub has_more: bool,
}
