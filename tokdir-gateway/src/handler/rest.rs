use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query};
use http::StatusCode;
use serde::Deserialize;
use tokdir_directory::{DirectoryError, TokenDirectory, TokenEntry};
use tokdir_docstore::DocumentStore;

use super::HandlerSettings;
use crate::error::GatewayError;

type Directory<S> = Arc<TokenDirectory<S>>;

#[derive(Deserialize, Debug)]
pub struct RegisterBody {
    token: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct ScanParams {
    batch_size: Option<usize>,
}

pub async fn register_token<S: DocumentStore>(
    Path(device_id): Path<String>,
    Extension(directory): Extension<Directory<S>>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<StatusCode, GatewayError> {
    let Json(body) =
        body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    directory.register_token(&device_id, &body.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unregister_token<S: DocumentStore>(
    Path(device_id): Path<String>,
    Extension(directory): Extension<Directory<S>>,
) -> Result<StatusCode, GatewayError> {
    directory.unregister_token(&device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn lookup_token<S: DocumentStore>(
    Path(device_id): Path<String>,
    Extension(directory): Extension<Directory<S>>,
) -> Result<Json<TokenEntry>, GatewayError> {
    match directory.lookup_token(&device_id).await? {
        Some(token) => Ok(Json(TokenEntry { device_id, token })),
        None => Err(DirectoryError::NotFound(device_id).into()),
    }
}

/// Full listing, built from one restartable scan
pub async fn list_tokens<S: DocumentStore>(
    Query(params): Query<ScanParams>,
    Extension(directory): Extension<Directory<S>>,
    Extension(settings): Extension<HandlerSettings>,
) -> Result<Json<Vec<TokenEntry>>, GatewayError> {
    let batch = params.batch_size.unwrap_or(settings.default_scan_batch);
    let entries = directory.scan_all(batch)?.collect_all().await?;
    Ok(Json(entries))
}
