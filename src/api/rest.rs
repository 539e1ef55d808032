//! HTTP front-end for the block storage service.
//!
//! Thin controllers only: extract parameters, bridge the streaming body
//! into the builder's reader, delegate to the service, map errors to
//! status codes. The write path pipes the request body through a
//! back-pressured stream reader so a slow store throttles the network.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use crate::modules::storage::block::{BlockStorage, ContentId, StorageError};
use crate::utils::ctx::OpContext;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    storage: Arc<BlockStorage>,
}

impl ApiState {
    pub fn new(storage: Arc<BlockStorage>) -> Self {
        Self { storage }
    }
}

/// Build the API router.
///
/// The write and read operations share the `/v1/blocks/{..}` path: POST
/// takes a payload name, GET takes a content id. They are registered on a
/// single route because the router requires one parameter name per
/// position.
pub fn router(storage: Arc<BlockStorage>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/blocks/{id}", post(write_block).get(get_block))
        .with_state(ApiState::new(storage))
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Response after writing a payload.
#[derive(Debug, Serialize)]
pub struct WriteBlockResponse {
    pub cid: String,
}

/// A link as rendered to clients.
#[derive(Debug, Serialize)]
pub struct LinkDto {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tsize: u64,
}

/// A block as rendered to clients; leaf data travels base64-encoded.
#[derive(Debug, Serialize)]
pub struct BlockDto {
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub links: Vec<LinkDto>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// API error carrying the mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NameEmpty
            | StorageError::DataEmpty
            | StorageError::IdentifierInvalid(_) => StatusCode::BAD_REQUEST,
            StorageError::Cancelled | StorageError::TimedOut => StatusCode::REQUEST_TIMEOUT,
            StorageError::NotFound(_) | StorageError::ProviderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %err, "Request failed");
        }

        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

/// `POST /v1/blocks/{name}` — stream a payload in, get the root id back.
async fn write_block(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Body,
) -> Result<Json<WriteBlockResponse>, ApiError> {
    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let reader = StreamReader::new(stream);

    let ctx = OpContext::background();
    let root_id = state.storage.create_block(&ctx, &name, reader).await?;

    info!(name = %name, cid = %root_id, "Payload written");

    Ok(Json(WriteBlockResponse {
        cid: root_id.to_string(),
    }))
}

/// `GET /v1/blocks/{cid}` — resolve and return one block.
async fn get_block(
    State(state): State<ApiState>,
    Path(cid): Path<String>,
) -> Result<Json<BlockDto>, ApiError> {
    let id = ContentId::parse(&cid)?;

    let ctx = OpContext::background();
    let block = state.storage.get_block(&ctx, &id).await?;

    let data = if block.data.is_empty() {
        None
    } else {
        Some(base64::engine::general_purpose::STANDARD.encode(&block.data))
    };

    Ok(Json(BlockDto {
        cid: id.to_string(),
        name: (!block.name.is_empty()).then(|| block.name.clone()),
        data,
        links: block
            .links
            .iter()
            .map(|l| LinkDto {
                hash: l.hash.clone(),
                name: (!l.name.is_empty()).then(|| l.name.clone()),
                tsize: l.tsize,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_invalid_argument() {
        let err = ApiError::from(StorageError::NameEmpty);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(StorageError::IdentifierInvalid("bad".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = ApiError::from(StorageError::DataEmpty);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_mapping_aborted() {
        let err = ApiError::from(StorageError::Cancelled);
        assert_eq!(err.status, StatusCode::REQUEST_TIMEOUT);

        let err = ApiError::from(StorageError::TimedOut);
        assert_eq!(err.status, StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_error_mapping_not_found() {
        let id = ContentId::digest(b"gone");
        let err = ApiError::from(StorageError::ProviderNotFound(id.clone()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(StorageError::NotFound(id));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_mapping_internal() {
        let err = ApiError::from(StorageError::StoreWriteFailed("disk full".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(StorageError::TransportFailed("reset".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
