//! Upload pipeline: normalize, estimate walls, fuse, commit.

use image::RgbImage;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};
use wall_estimator::{CornerEstimate, GeometryEstimator, Segmenter};

use crate::error::{Result, RoomError};
use crate::image_preprocessor::normalize_room_photo;
use crate::mask_fusion::{fuse_wall_mask, FusionResult, FusionStats};
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub polygons: usize,
    pub wall_pixels: usize,
    pub fusion: FusionStats,
    pub total_execution_time_ms: u128,
    pub method_timings: Vec<(String, u128)>,
}

#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Request carried no file; nothing was touched
    Unchanged,
    Committed(UploadSummary),
}

/// Output of the inference step, computed off the async runtime
struct WallEstimate {
    photo: RgbImage,
    corners: CornerEstimate,
    fusion: FusionResult,
    method_timings: Vec<(String, u128)>,
}

/// Run the full upload pipeline for an optional file payload.
///
/// Nothing is written unless decoding, inference and fusion all succeed;
/// a failure leaves the previously committed room untouched.
pub async fn run_upload(state: &AppState, file: Option<Vec<u8>>) -> Result<UploadOutcome> {
    let Some(bytes) = file.filter(|b| !b.is_empty()) else {
        info!("Upload carried no room photo, keeping current state");
        return Ok(UploadOutcome::Unchanged);
    };

    let start = Instant::now();
    let mut method_timings = Vec::new();
    info!("Received room photo upload ({} bytes)", bytes.len());

    let step = Instant::now();
    let max_height = state.config.max_photo_height;
    let normalized =
        tokio::task::spawn_blocking(move || normalize_room_photo(&bytes, max_height)).await??;
    method_timings.push(("normalize".to_string(), step.elapsed().as_millis()));
    let (original_width, original_height) = (normalized.original_width, normalized.original_height);

    let segmenter = state.segmenter.clone();
    let geometry = state.geometry.clone();
    let photo = normalized.image;
    let inference = tokio::task::spawn_blocking(move || {
        estimate_walls(segmenter.as_ref(), geometry.as_ref(), photo)
    });

    let timeout = state.config.inference_timeout;
    let estimate = match tokio::time::timeout(timeout, inference).await {
        Ok(joined) => joined??,
        Err(_) => {
            warn!(
                "Wall estimation exceeded {}s, discarding upload",
                timeout.as_secs()
            );
            return Err(RoomError::Timeout(timeout.as_secs()));
        }
    };
    method_timings.extend(estimate.method_timings);

    let WallEstimate {
        photo,
        corners,
        fusion,
        ..
    } = estimate;
    let polygons = corners.len();
    let stats = fusion.stats;

    let step = Instant::now();
    let store = state.store.clone();
    let policy = state.config.composite_policy;
    let manifest = tokio::task::spawn_blocking(move || {
        store.commit_upload(&photo, &fusion.mask, &corners, policy)
    })
    .await??;
    method_timings.push(("commit".to_string(), step.elapsed().as_millis()));

    let summary = UploadSummary {
        generation: manifest.generation,
        width: manifest.width,
        height: manifest.height,
        original_width,
        original_height,
        polygons,
        wall_pixels: manifest.wall_pixels,
        fusion: stats,
        total_execution_time_ms: start.elapsed().as_millis(),
        method_timings,
    };

    info!(
        "Upload committed as generation {} in {}ms",
        summary.generation, summary.total_execution_time_ms
    );
    Ok(UploadOutcome::Committed(summary))
}

/// Segment, estimate layout and fuse. Blocking.
fn estimate_walls(
    segmenter: &dyn Segmenter,
    geometry: &dyn GeometryEstimator,
    photo: RgbImage,
) -> Result<WallEstimate> {
    let mut method_timings = Vec::new();

    let step = Instant::now();
    let segmentation = segmenter.segment(&photo).map_err(RoomError::inference)?;
    method_timings.push(("segmentation".to_string(), step.elapsed().as_millis()));

    if segmentation.dimensions() != photo.dimensions() {
        return Err(RoomError::Inference(format!(
            "segmentation mask is {:?}, photo is {:?}",
            segmentation.dimensions(),
            photo.dimensions()
        )));
    }

    let step = Instant::now();
    let corners = geometry.estimate(&photo).map_err(RoomError::inference)?;
    method_timings.push(("geometry".to_string(), step.elapsed().as_millis()));
    info!("Layout estimation produced {} wall polygons", corners.len());

    if let Some([x, y]) = corners.find_out_of_frame(photo.width(), photo.height()) {
        return Err(RoomError::Inference(format!(
            "wall polygon vertex ({}, {}) is far outside the {}x{} photo",
            x,
            y,
            photo.width(),
            photo.height()
        )));
    }

    let step = Instant::now();
    let fusion = fuse_wall_mask(&segmentation, &corners);
    method_timings.push(("fusion".to_string(), step.elapsed().as_millis()));

    Ok(WallEstimate {
        photo,
        corners,
        fusion,
        method_timings,
    })
}
