//! HTTP surface: `POST /detect` (multipart `image` field) and `GET /health`.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use likeness_core::{Gallery, GallerySummary, ImageReport};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Multipart field carrying the uploaded image.
const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
    gallery: Arc<Gallery>,
}

impl AppState {
    pub fn new(engine: EngineHandle, gallery: Arc<Gallery>) -> Self {
        Self { engine, gallery }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    gallery: GallerySummary,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image provided")]
    MissingImage,
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingImage => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Engine(EngineError::ChannelClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the service router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        gallery: state.gallery.summary(),
    })
}

async fn detect(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImageReport>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let image = field.bytes().await?;
        tracing::debug!(bytes = image.len(), "image received");
        let report = state.engine.recognize(image).await?;
        return Ok(Json(report));
    }
    Err(ApiError::MissingImage)
}
