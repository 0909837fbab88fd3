//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk writes in the upload directory

use crate::services::file_service::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
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
/// Writes and removes a temp file under the upload directory through the
/// same path uploads take. HTTP 200 when it passes, HTTP 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let disk = match service.check_storage().await {
        Ok(()) => CheckStatus { ok: true, error: None },
        Err(err) => {
            warn!("readiness disk check failed: {}", err);
            CheckStatus {
                ok: false,
                error: Some(err.to_string()),
            }
        }
    };

    let (status, label) = if disk.ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    let body = ReadyResponse {
        status: label.into(),
        checks: HashMap::from([("disk", disk)]),
    };
    (status, Json(body))
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
