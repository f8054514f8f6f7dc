//! Normalisation as a service: one JSON endpoint over the canvas pipeline.
//!
//! `POST /format_image` takes `{ "image_base64": "...", "threshold": 240 }`
//! and answers `{ "formatted_image_base64": "..." }` with a 1200 × 1200 WebP.
//! Every failure (oversized or unreadable body, bad JSON, bad base64,
//! undecodable image) is a 400 with `{ "detail": "<message>" }`. `GET /health` answers `{ "status": "ok" }`.

use crate::config::{NormalizeOptions, ServerConfig};
use crate::error::SquareshotError;
use crate::format::format_base64;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request body of `POST /format_image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatImageRequest {
    pub image_base64: String,
    /// Background threshold; the server default (240) when absent or 0.
    #[serde(default)]
    pub threshold: Option<u8>,
}

/// Response body of `POST /format_image`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatImageResponse {
    pub formatted_image_base64: String,
}

#[derive(Debug, Clone)]
struct AppState {
    options: NormalizeOptions,
}

/// A 400 with a `detail` message.
#[derive(Debug)]
struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("format_image rejected: {}", self.0);
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": self.0 })),
        )
            .into_response()
    }
}

/// Build the router without binding a socket.
pub fn router(config: &ServerConfig) -> Router {
    let state = Arc::new(AppState {
        options: config.normalize,
    });
    Router::new()
        .route("/format_image", post(format_image))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(state)
}

/// Bind `config.bind` and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<(), SquareshotError> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|e| SquareshotError::ServerFailed {
            bind: config.bind.clone(),
            source: e,
        })?;
    info!("Serving POST /format_image on http://{}", config.bind);

    axum::serve(listener, router(&config))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .map_err(|e| SquareshotError::ServerFailed {
            bind: config.bind.clone(),
            source: e,
        })
}

async fn format_image(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<FormatImageResponse>, ApiError> {
    let body = body.map_err(|e| ApiError(format!("Invalid request body: {}", e.body_text())))?;
    let request: FormatImageRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError(format!("Invalid request body: {e}")))?;

    let mut options = state.options;
    if let Some(threshold) = request.threshold.filter(|&t| t > 0) {
        options.threshold = threshold;
    }
    debug!(
        "format_image: {} base64 chars, threshold {}",
        request.image_base64.len(),
        options.threshold
    );

    let formatted = tokio::task::spawn_blocking(move || format_base64(&request.image_base64, &options))
        .await
        .map_err(|e| ApiError(format!("Worker failed: {e}")))?
        .map_err(|e| ApiError(e.to_string()))?;

    Ok(Json(FormatImageResponse {
        formatted_image_base64: formatted,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
