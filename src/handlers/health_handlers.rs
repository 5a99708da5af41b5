//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata table and disk I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness only, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Reads one row of the metadata table through the store.
/// 2. Writes, reads back and deletes a temp file under the storage dir.
///
/// HTTP 200 when all checks pass, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata_check = match state.records.scan_all(1, None).await {
        Ok(_) => (true, None::<String>),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let disk_check = disk_round_trip(&state).await;

    let metadata_ok = metadata_check.0;
    let disk_ok = disk_check.0;
    let overall_ok = metadata_ok && disk_ok;

    let mut checks = HashMap::new();
    checks.insert(
        "metadata",
        CheckStatus {
            ok: metadata_ok,
            error: metadata_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_ok,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn disk_round_trip(state: &AppState) -> (bool, Option<String>) {
    let tmp_path = state
        .blobs
        .base_path
        .join(format!(".readyz-{}", Uuid::new_v4()));

    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return (false, Some(format!("could not write tmp file: {}", e)));
    }
    let read = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;

    match (read, removed) {
        (Ok(bytes), Ok(_)) if bytes == b"readyz" => (true, None),
        (Ok(bytes), Err(e)) if bytes == b"readyz" => {
            (true, Some(format!("could not remove tmp file: {}", e)))
        }
        (Ok(_), _) => (false, Some("file content mismatch".to_string())),
        (Err(e), _) => (false, Some(format!("could not read tmp file: {}", e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
