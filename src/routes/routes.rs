//! Defines routes for the image upload service.
//!
//! ## Structure
//! - `POST /upload` : multipart image upload (JSON bodies answer 501)
//! - `POST /delete` : delete previously returned URLs
//! - `GET  /healthz`: liveness
//! - `GET  /readyz` : readiness (disk write check)
//!
//! Upload and delete sit behind the shared-secret guard when auth is enabled.

use crate::{
    config::AuthConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{delete, upload},
    },
    middleware::auth::require_secret,
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;

/// Build the router. It carries `FileService` as shared state.
pub fn routes(auth: AuthConfig) -> Router<FileService> {
    let api = Router::new()
        // per-file limits are enforced while streaming
        .route("/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/delete", post(delete))
        .route_layer(middleware::from_fn_with_state(Arc::new(auth), require_secret));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(api)
}
