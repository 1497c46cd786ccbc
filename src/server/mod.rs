//! HTTP front for the shelf service.
//!
//! ## Routes
//!
//! - `POST /detect` - multipart upload, one image
//! - `GET /stats?days=N` - counts over the trailing window (default 7 days)
//! - `GET /health` - liveness, does not touch the model or the store
//!
//! Anything else falls through to the static frontend when one is present.

mod error;
mod routes;

use std::path::Path;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use routes::{DetectResponse, HealthResponse, StatsResponse};

use crate::service::ShelfService;

/// Uploads larger than this are rejected before they reach the detector.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn create_router(service: ShelfService, frontend_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/detect", post(routes::detect))
        .route("/stats", get(routes::stats))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service);

    match frontend_dir {
        Some(dir) if dir.is_dir() => {
            tracing::info!(dir = %dir.display(), "Serving frontend");
            let index = ServeFile::new(dir.join("index.html"));
            router = router.fallback_service(ServeDir::new(dir).fallback(index));
        }
        Some(dir) => {
            tracing::warn!(dir = %dir.display(), "Frontend not found, serving API only");
        }
        None => {}
    }

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
