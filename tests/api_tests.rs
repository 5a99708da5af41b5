//! End-to-end tests of the HTTP API against temp SQLite and disk storage.

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use chrono::{Duration, TimeZone, Utc};
use common::{TestServer, local_path};
use image_vault::services::object_store::ObjectStore;
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::atomic::Ordering};

fn upload_body(size: i64, content_type: &str) -> Value {
    json!({
        "user_id": "alice",
        "filename": "photo.png",
        "content_type": content_type,
        "file_size": size,
    })
}

fn ids(page: &Value) -> Vec<String> {
    page["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|img| img["image_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn issuing_upload_url_creates_no_record() {
    let server = TestServer::new().await;
    let (status, body) = server
        .json("POST", "/images/upload-url", Some(upload_body(4, "image/png")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["presigned_url"], "http://vault.test/blobs/image-vault");
    let image_id = body["image_id"].as_str().unwrap();
    assert_eq!(
        body["s3_key"],
        format!("images/alice/{}_photo.png", image_id)
    );
    assert!(server.records.get(image_id).await.unwrap().is_none());

    let (status, body) = server
        .json("GET", &format!("/images/{}/download-url", image_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn upload_complete_and_download_round_trip() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "holiday pic.png", b"\x89PNG").await;

    let record = server.records.get(&image_id).await.unwrap().unwrap();
    assert_eq!(record.owner_id, "alice");
    assert_eq!(record.file_size, 4);
    assert_eq!(record.content_type, "image/png");
    assert_eq!(
        record.storage_key,
        format!("images/alice/{}_holiday_pic.png", image_id)
    );

    let (status, body) = server
        .json("GET", &format!("/images/{}/download-url", image_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "holiday pic.png");
    assert_eq!(body["expires_in"], 900);

    let url = body["presigned_url"].as_str().unwrap();
    let request = Request::builder()
        .uri(local_path(url))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = server.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"\x89PNG");
    assert_eq!(headers["content-type"], "image/png");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"holiday pic.png\""
    );
}

#[tokio::test]
async fn complete_without_upload_is_not_found() {
    let server = TestServer::new().await;
    let image_id = uuid::Uuid::new_v4().to_string();

    let (status, body) = server
        .json(
            "POST",
            "/images/complete",
            Some(json!({
                "image_id": image_id,
                "user_id": "alice",
                "filename": "photo.png",
                "content_type": "image/png",
                "file_size": 4,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["message"],
        "Image not uploaded to S3. Please upload the file first."
    );
    assert!(server.records.get(&image_id).await.unwrap().is_none());
}

#[tokio::test]
async fn upload_must_match_signed_policy() {
    let server = TestServer::new().await;
    let (_, issued) = server
        .json("POST", "/images/upload-url", Some(upload_body(4, "image/png")))
        .await;
    let url = issued["presigned_url"].as_str().unwrap();
    let fields: BTreeMap<String, String> =
        serde_json::from_value(issued["fields"].clone()).unwrap();

    let (status, body) = server.post_form(url, &fields, b"too long").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    let mut forged = fields.clone();
    forged.insert("signature".into(), "00".repeat(32));
    let (status, body) = server.post_form(url, &forged, b"1234").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let mut retargeted = fields.clone();
    retargeted.insert("key".into(), "images/mallory/x.png".into());
    let (status, _) = server.post_form(url, &retargeted, b"1234").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let key = issued["s3_key"].as_str().unwrap();
    assert!(!server.blobs.exists(key).await.unwrap());
}

#[tokio::test]
async fn tampered_download_url_is_refused() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "a.png", b"data").await;
    let (_, body) = server
        .json("GET", &format!("/images/{}/download-url", image_id), None)
        .await;
    let url = body["presigned_url"].as_str().unwrap();

    let tampered = url.replace("expires=", "expires=1");
    let (status, body) = server.json("GET", &tampered, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let unsigned = local_path(url).split('?').next().unwrap().to_string();
    let (status, _) = server.json("GET", &unsigned, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_by_non_owner_is_refused() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "a.png", b"data").await;

    let (status, body) = server
        .json(
            "DELETE",
            &format!("/images/{}", image_id),
            Some(json!({"user_id": "mallory"})),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["message"],
        "You don't have permission to delete this image"
    );
    assert!(server.records.get(&image_id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_by_owner_removes_record_and_object() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "a.png", b"data").await;
    let key = server.records.get(&image_id).await.unwrap().unwrap().storage_key;

    let (status, body) = server
        .json(
            "DELETE",
            &format!("/images/{}", image_id),
            Some(json!({"user_id": "alice"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deleted");
    assert!(server.records.get(&image_id).await.unwrap().is_none());
    assert!(!server.blobs.exists(&key).await.unwrap());

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/images/{}", image_id),
            Some(json!({"user_id": "alice"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_survives_object_store_failure() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "a.png", b"data").await;
    server.objects.fail_deletes.store(true, Ordering::SeqCst);

    let (status, _) = server
        .json(
            "DELETE",
            &format!("/images/{}", image_id),
            Some(json!({"user_id": "alice"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(server.records.get(&image_id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_requires_user_id() {
    let server = TestServer::new().await;
    let (status, body) = server.json("DELETE", "/images/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing user_id in request body");
}

#[tokio::test]
async fn owner_listing_pages_newest_first() {
    let server = TestServer::new().await;
    let base = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    for i in 0..5 {
        server
            .seed(&format!("a{}", i), "alice", base + Duration::days(i))
            .await;
    }
    server.seed("b0", "bob", base).await;

    let mut seen = Vec::new();
    let mut uri = "/images?user_id=alice&limit=2".to_string();
    let mut pages = 0;
    loop {
        let (status, page) = server.json("GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK, "{page}");
        pages += 1;
        seen.extend(ids(&page));
        assert_eq!(page["count"], page["images"].as_array().unwrap().len());
        match page["next_token"].as_str() {
            Some(token) => {
                assert_eq!(page["has_more"], true);
                uri = format!("/images?user_id=alice&limit=2&next_token={}", token);
            }
            None => {
                assert_eq!(page["has_more"], false);
                break;
            }
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, vec!["a4", "a3", "a2", "a1", "a0"]);
}

#[tokio::test]
async fn owner_listing_honors_date_range() {
    let server = TestServer::new().await;
    let base = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    for i in 0..5 {
        server
            .seed(&format!("a{}", i), "alice", base + Duration::days(i))
            .await;
    }

    let (status, page) = server
        .json(
            "GET",
            "/images?user_id=alice&start_date=2026-01-11&end_date=2026-01-13",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&page), vec!["a3", "a2", "a1"]);

    let (status, body) = server
        .json(
            "GET",
            "/images?user_id=alice&start_date=2026-01-13&end_date=2026-01-11",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");
}

#[tokio::test]
async fn unfiltered_listing_visits_every_record() {
    let server = TestServer::new().await;
    let now = Utc::now();
    for i in 0..7 {
        let owner = if i % 2 == 0 { "alice" } else { "bob" };
        server.seed(&format!("img{}", i), owner, now).await;
    }

    let mut seen = Vec::new();
    let mut uri = "/images?limit=3".to_string();
    loop {
        let (status, page) = server.json("GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        seen.extend(ids(&page));
        match page["next_token"].as_str() {
            Some(token) => uri = format!("/images?limit=3&next_token={}", token),
            None => break,
        }
    }

    seen.sort();
    let expected: Vec<String> = (0..7).map(|i| format!("img{}", i)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn malformed_or_mismatched_tokens_are_rejected() {
    let server = TestServer::new().await;
    let now = Utc::now();
    for i in 0..3 {
        server
            .seed(&format!("a{}", i), "alice", now + Duration::seconds(i))
            .await;
    }

    let (status, body) = server
        .json("GET", "/images?user_id=alice&next_token=bm90LWpzb24", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid pagination token");

    let (_, page) = server.json("GET", "/images?user_id=alice&limit=1", None).await;
    let owner_token = page["next_token"].as_str().unwrap();
    let (status, body) = server
        .json("GET", &format!("/images?next_token={}", owner_token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid pagination token");
}

#[tokio::test]
async fn list_limit_bounds() {
    let server = TestServer::new().await;
    for limit in ["0", "101", "ten"] {
        let (status, body) = server
            .json("GET", &format!("/images?limit={}", limit), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "limit={limit}");
        assert_eq!(body["details"]["errors"][0]["field"], "limit");
    }

    let (status, body) = server.json("GET", "/images?limit=100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["has_more"], false);
    assert!(body.get("next_token").is_none());
}

#[tokio::test]
async fn upload_validation_boundaries() {
    let server = TestServer::new().await;

    for (size, content_type) in [
        (0, "image/png"),
        (10_485_761, "image/png"),
        (1024, "image/svg+xml"),
    ] {
        let (status, body) = server
            .json(
                "POST",
                "/images/upload-url",
                Some(upload_body(size, content_type)),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{size} {content_type}");
        assert_eq!(body["error"], "ValidationError");
        assert_eq!(body["message"], "Invalid request data");
    }

    let (status, _) = server
        .json(
            "POST",
            "/images/upload-url",
            Some(upload_body(10_485_760, "image/png")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server.json("POST", "/images/upload-url", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"]["errors"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn overlong_user_id_is_a_validation_error() {
    let server = TestServer::new().await;

    for len in [256, 300, 1100] {
        let user_id = "u".repeat(len);
        let mut body = upload_body(4, "image/png");
        body["user_id"] = json!(user_id);
        let (status, resp) = server.json("POST", "/images/upload-url", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "len={len}");
        assert_eq!(resp["error"], "ValidationError");
        assert_eq!(resp["details"]["errors"][0]["field"], "user_id");

        let (status, resp) = server
            .json(
                "POST",
                "/images/complete",
                Some(json!({
                    "image_id": uuid::Uuid::new_v4().to_string(),
                    "user_id": user_id,
                    "filename": "photo.png",
                    "content_type": "image/png",
                    "file_size": 4,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "len={len}");
        assert_eq!(resp["error"], "ValidationError");
    }
}

#[tokio::test]
async fn longest_user_id_and_filename_upload_end_to_end() {
    let server = TestServer::new().await;
    let owner = "u".repeat(255);
    let filename = format!("{}.png", "a".repeat(300));

    let image_id = server.upload_image(&owner, &filename, b"\x89PNG").await;

    let record = server.records.get(&image_id).await.unwrap().unwrap();
    assert_eq!(record.owner_id, owner);
    assert_eq!(record.filename, filename);
    assert!(record.storage_key.len() <= 1024);
    assert!(server.blobs.exists(&record.storage_key).await.unwrap());
}

#[tokio::test]
async fn repeated_query_keys_are_validation_errors() {
    let server = TestServer::new().await;
    let request = Request::builder()
        .uri("/images?limit=1&limit=2")
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = server.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers["content-type"], "application/json");
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "ValidationError");
    assert_eq!(body["details"]["errors"][0]["field"], "query");
}

#[tokio::test]
async fn non_ascii_filename_keeps_its_download_disposition() {
    let server = TestServer::new().await;
    let image_id = server.upload_image("alice", "été.png", b"\x89PNG").await;

    let (status, body) = server
        .json("GET", &format!("/images/{}/download-url", image_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri(local_path(body["presigned_url"].as_str().unwrap()))
        .body(Body::empty())
        .unwrap();
    let (status, headers, bytes) = server.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"\x89PNG");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"_t_.png\"; filename*=UTF-8''%C3%A9t%C3%A9.png"
    );
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let server = TestServer::new().await;
    let request = Request::builder()
        .uri("/healthz")
        .header("Origin", "https://app.example")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = server.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn readiness_checks_pass() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["metadata"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}
