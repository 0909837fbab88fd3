//! HTTP handlers for image upload and deletion.
//! Multipart file parts are streamed straight into `FileService`; nothing is
//! buffered beyond the sniff header and the copy buffer.

use crate::{
    errors::AppError,
    models::upload::{DeleteRequest, UploadRequest, UploadResponse},
    services::file_service::{FileService, UploadDescriptor},
};
use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
};
use futures::TryStreamExt;
use std::io;
use tokio_util::io::StreamReader;
use tracing::{error, warn};

/// `POST /upload`
///
/// Multipart bodies are ingested part by part. JSON bodies describe
/// clipboard or local-path uploads, which this server does not perform.
pub async fn upload(
    State(service): State<FileService>,
    request: Request,
) -> Result<Json<UploadResponse>, AppError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.contains("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| AppError::bad_request(format!("Failed to parse form: {}", err.body_text())))?;
        return upload_form(&service, multipart).await;
    }

    if content_type.contains("application/json") {
        let Json(req) = Json::<UploadRequest>::from_request(request, &())
            .await
            .map_err(|_| AppError::bad_request("Invalid JSON request"))?;
        let message = if req.list.is_empty() {
            "Clipboard upload not supported in this implementation"
        } else {
            "Path upload not supported in this implementation"
        };
        return Err(AppError::new(StatusCode::NOT_IMPLEMENTED, message));
    }

    Err(AppError::bad_request("Unsupported content type"))
}

/// Ingest every file part in order. The first failing part aborts the
/// request; parts stored before it stay stored.
async fn upload_form(
    service: &FileService,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut results = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("Failed to parse form: {err}")))?
    {
        // Plain form values carry no filename; an unselected file input
        // sends an empty one.
        let Some(filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let size = field
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let stream = field.map_err(io::Error::other);
        let reader = StreamReader::new(stream);
        tokio::pin!(reader);

        let result = service
            .ingest(UploadDescriptor {
                filename: filename.clone(),
                size,
                reader,
            })
            .await
            .map_err(|err| {
                if err.status().is_server_error() {
                    error!("failed to store {}: {}", filename, err);
                } else {
                    warn!("rejected {}: {}", filename, err);
                }
                AppError::upload_failed(err)
            })?;
        results.push(result);
    }

    if results.is_empty() {
        return Err(AppError::bad_request("No files uploaded"));
    }

    Ok(Json(UploadResponse::uploaded(results)))
}

/// `POST /delete`
pub async fn delete(
    State(service): State<FileService>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let Json(req) = payload.map_err(|_| AppError::bad_request("Invalid JSON request"))?;
    if req.list.is_empty() {
        return Err(AppError::bad_request("No files to delete"));
    }

    service.delete_batch(&req.list).await.map_err(|failure| {
        warn!("delete aborted at item {}: {}", failure.index, failure.error);
        AppError::from(failure)
    })?;

    Ok(Json(UploadResponse::ok_message("Files deleted successfully")))
}
