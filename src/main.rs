use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;

/// Temp files older than this are left over from a crash.
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Load config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting xrpic with config: {:?}", cfg);

    // --- Ensure upload directory exists ---
    if !cfg.storage.upload_dir.exists() {
        fs::create_dir_all(&cfg.storage.upload_dir).with_context(|| {
            format!("creating upload directory {}", cfg.storage.upload_dir.display())
        })?;
        tracing::info!("Created upload directory at {}", cfg.storage.upload_dir.display());
    }

    // --- Clear temp files left by a previous crash ---
    match services::placement::sweep_orphans(&cfg.storage.upload_dir, ORPHAN_MAX_AGE).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!("Removed {} orphaned temp files", removed),
        Err(err) => tracing::warn!("Orphan sweep failed: {}", err),
    }

    // --- Initialize core service ---
    let service = services::file_service::FileService::new(&cfg.storage);

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.auth.clone()).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.server.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.server.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {addr}")),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
