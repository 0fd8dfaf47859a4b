//! HTTP handlers.

use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::display::{resolve_display, DisplayState};
use crate::error::{Result, RoomError};
use crate::mask_fusion::FusionStats;
use crate::room_store::ArtifactKey;
use crate::texture_orchestrator::apply_texture;
use crate::upload_orchestrator::{run_upload, UploadOutcome};
use crate::AppState;

/// Multipart field names accepted for the room photo
const PHOTO_FIELDS: [&str; 2] = ["file", "image"];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn index() -> Redirect {
    Redirect::to("/room")
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygons: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion: Option<FusionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub method_timings: Vec<(String, u128)>,
}

/// First non-empty photo field of the multipart body, if any
async fn extract_file(multipart: &mut Multipart) -> Result<Option<Vec<u8>>> {
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        debug!("Processing multipart field {}", field_name);

        if PHOTO_FIELDS.contains(&field_name.as_str()) {
            let bytes = field.bytes().await?;
            if bytes.is_empty() {
                continue;
            }
            debug!("Extracted {} bytes from field {}", bytes.len(), field_name);
            return Ok(Some(bytes.to_vec()));
        }
    }

    Ok(None)
}

/// POST /prediction - upload a room photo
pub async fn upload_room_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let file = extract_file(&mut multipart).await?;

    if let Some(bytes) = &file {
        if bytes.len() > state.config.max_upload_mb * 1024 * 1024 {
            return Err(RoomError::FileTooLarge {
                max_mb: state.config.max_upload_mb,
            });
        }
    }

    let response = match run_upload(&state, file).await? {
        UploadOutcome::Unchanged => UploadResponse {
            state: "unchanged".to_string(),
            generation: None,
            room_path: None,
            width: None,
            height: None,
            polygons: None,
            fusion: None,
            execution_time_ms: None,
            method_timings: Vec::new(),
        },
        UploadOutcome::Committed(summary) => UploadResponse {
            state: "success".to_string(),
            generation: Some(summary.generation),
            room_path: Some("/room".to_string()),
            width: Some(summary.width),
            height: Some(summary.height),
            polygons: Some(summary.polygons),
            fusion: Some(summary.fusion),
            execution_time_ms: Some(summary.total_execution_time_ms),
            method_timings: summary.method_timings,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct RoomView {
    /// Image to display, or `None` before the first upload
    pub room: Option<String>,
    pub display: DisplayState,
    pub stale: bool,
    pub generation: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub textures: Vec<String>,
}

/// GET /room - what the room page should show, plus the texture choices
pub async fn room_view_handler(State(state): State<AppState>) -> Result<Json<RoomView>> {
    let store = state.store.clone();
    let manifest = tokio::task::spawn_blocking(move || store.snapshot()).await??;
    let display = resolve_display(manifest.as_ref());

    let room = display.path().map(|path| match &manifest {
        Some(m) => format!("{}?generation={}", path, m.generation),
        None => path.to_string(),
    });

    Ok(Json(RoomView {
        room,
        display,
        stale: display.is_stale(),
        generation: manifest.as_ref().map(|m| m.generation),
        width: manifest.as_ref().map(|m| m.width),
        height: manifest.as_ref().map(|m| m.height),
        textures: state.textures.list(),
    }))
}

async fn serve_artifact(state: &AppState, key: ArtifactKey) -> Result<Response> {
    let store = state.store.clone();
    let bytes = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
        match store.snapshot()? {
            Some(manifest) => store.load_artifact_bytes(&manifest, key),
            None => Ok(None),
        }
    })
    .await??;

    match bytes {
        Some(bytes) => Ok((
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response()),
        None => {
            debug!("No {} to serve", key.as_str());
            Ok(StatusCode::NOT_FOUND.into_response())
        }
    }
}

/// GET /room/photo
pub async fn room_photo_handler(State(state): State<AppState>) -> Result<Response> {
    serve_artifact(&state, ArtifactKey::RoomPhoto).await
}

/// GET /room/composite
pub async fn room_composite_handler(State(state): State<AppState>) -> Result<Response> {
    serve_artifact(&state, ArtifactKey::TexturedRoom).await
}

#[derive(Debug, Deserialize)]
pub struct TextureRequest {
    pub texture: String,
}

#[derive(Debug, Serialize)]
pub struct TextureResponse {
    pub state: String,
    pub room_path: String,
    pub generation: u64,
    pub execution_time_ms: u128,
    pub method_timings: Vec<(String, u128)>,
}

/// POST /result_textured - composite a library texture onto the walls
pub async fn apply_texture_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TextureRequest>, JsonRejection>,
) -> Result<Json<TextureResponse>> {
    let Json(request) = payload?;
    info!("Received texture request for {}", request.texture);

    let applied = apply_texture(&state, &request.texture).await?;

    Ok(Json(TextureResponse {
        state: "success".to_string(),
        room_path: applied.room_path,
        generation: applied.generation,
        execution_time_ms: applied.total_execution_time_ms,
        method_timings: applied.method_timings,
    }))
}
