//! Shared-secret guard for the upload and delete routes.
//!
//! The secret may arrive as `Authorization: Bearer <secret>` or as the
//! `key` query parameter used by PicGo-style clients.

use crate::{config::AuthConfig, errors::AppError};
use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    pub key: Option<String>,
}

pub async fn require_secret(
    State(auth): State<Arc<AuthConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    // An unparsable query string counts as no key.
    let query = Query::<AuthQuery>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    let presented = bearer.or(query.key.as_deref());
    if presented == Some(auth.secret_key.as_str()) {
        return next.run(request).await;
    }

    warn!("rejected unauthenticated {} {}", request.method(), request.uri().path());
    AppError::unauthorized().into_response()
}
