use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use http::Uri;
use tokdir_directory::TokenDirectory;
use tokdir_docstore::DocumentStore;
use tower_http::trace::TraceLayer;

use crate::error::GatewayError;
use crate::metrics::{HttpMetrics, otel_metrics};

mod rest;

/// Settings the handlers read per request
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    pub default_scan_batch: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            default_scan_batch: 500,
        }
    }
}

pub fn build_router<S: DocumentStore>(
    directory: Arc<TokenDirectory<S>>,
    settings: HandlerSettings,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<S>))
        .route(
            "/api/devices/{device_id}/token",
            get(rest::lookup_token::<S>)
                .put(rest::register_token::<S>)
                .delete(rest::unregister_token::<S>),
        )
        .route("/api/tokens", get(rest::list_tokens::<S>))
        .fallback(no_found)
        .layer(axum::middleware::from_fn(otel_metrics))
        .layer(Extension(Arc::new(HttpMetrics::new())))
        .layer(Extension(directory))
        .layer(Extension(settings))
        .layer(TraceLayer::new_for_http())
}

pub async fn no_found(uri: Uri) -> Response {
    GatewayError::NoRoute(uri.path().to_string()).into_response()
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz<S: DocumentStore>(
    Extension(directory): Extension<Arc<TokenDirectory<S>>>,
) -> Result<&'static str, GatewayError> {
    directory.health().await?;
    Ok("ready")
}
