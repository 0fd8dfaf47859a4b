//! Texture application: re-composite the committed room with a library texture.
//!
//! Reads the committed photo, wall mask and corner estimate and never reruns
//! inference.

use serde::Serialize;
use std::time::Instant;
use tracing::info;

use crate::error::{Result, RoomError};
use crate::room_store::{RoomManifest, RoomStore};
use crate::texture_library::TextureLibrary;
use crate::texture_mapping::{brightness_transfer, load_texture, map_texture};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct TextureApplied {
    pub generation: u64,
    pub texture: String,
    /// Where the composite can be fetched; the query changes with every
    /// generation so clients do not reuse a cached image
    pub room_path: String,
    pub total_execution_time_ms: u128,
    pub method_timings: Vec<(String, u128)>,
}

/// Composite `texture` onto the walls of the current room and persist it.
///
/// Fails with `Precondition` before the first upload and with `Superseded`
/// when a new upload is committed while the composite is being rendered.
/// The previous composite stays in place on any failure.
pub async fn apply_texture(state: &AppState, texture: &str) -> Result<TextureApplied> {
    let store = state.store.clone();
    let textures = state.textures.clone();
    let tiles = state.config.texture_tiles;
    let texture = texture.to_string();

    tokio::task::spawn_blocking(move || render_composite(&store, &textures, tiles, &texture))
        .await?
}

fn render_composite(
    store: &RoomStore,
    textures: &TextureLibrary,
    (tiles_x, tiles_y): (u32, u32),
    texture: &str,
) -> Result<TextureApplied> {
    let start = Instant::now();
    let mut method_timings = Vec::new();

    let manifest: RoomManifest = store.snapshot()?.ok_or(RoomError::Precondition)?;
    let texture_path = textures.resolve(texture)?;
    info!(
        "Applying texture {} to room generation {}",
        texture, manifest.generation
    );

    let step = Instant::now();
    let photo = store.load_photo(&manifest)?;
    let mask = store.load_wall_mask(&manifest)?;
    let corners = store.load_corners(&manifest)?;
    method_timings.push(("load_room".to_string(), step.elapsed().as_millis()));

    let step = Instant::now();
    let swatch = load_texture(&texture_path, tiles_x, tiles_y)?;
    method_timings.push(("load_texture".to_string(), step.elapsed().as_millis()));

    let step = Instant::now();
    let textured = map_texture(&swatch, &photo, &corners, &mask);
    method_timings.push(("map_texture".to_string(), step.elapsed().as_millis()));

    let step = Instant::now();
    let composite = brightness_transfer(&photo, &textured, &mask);
    method_timings.push(("brightness_transfer".to_string(), step.elapsed().as_millis()));

    let step = Instant::now();
    let committed = store.commit_composite(manifest.generation, &composite, texture)?;
    method_timings.push(("commit".to_string(), step.elapsed().as_millis()));

    let total_execution_time_ms = start.elapsed().as_millis();
    info!(
        "Textured room generation {} with {} in {}ms",
        committed.generation, texture, total_execution_time_ms
    );

    Ok(TextureApplied {
        generation: committed.generation,
        texture: texture.to_string(),
        room_path: format!("/room/composite?generation={}", committed.generation),
        total_execution_time_ms,
        method_timings,
    })
}
