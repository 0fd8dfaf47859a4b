use image::Luma;
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::Serialize;
use tracing::{debug, info, warn};
use wall_estimator::{
    polygon_in_frame, BinaryMask, CornerEstimate, Polygon, SegmentationMask, MASK_ON,
};

/// Pixel counts gathered while fusing, for logging and the upload summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    pub segmentation_pixels: usize,
    pub polygon_pixels: usize,
    pub fused_pixels: usize,
}

/// Result of fusing a segmentation mask with wall polygons
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub mask: BinaryMask,
    pub stats: FusionStats,
}

/// Render every polygon as a filled region, accumulating with logical OR
pub fn fill_polygons(width: u32, height: u32, corners: &CornerEstimate) -> BinaryMask {
    let mut filled = BinaryMask::new(width, height);

    for (idx, polygon) in corners.iter().enumerate() {
        // The rasteriser overflows on coordinates near the integer limits
        if !polygon_in_frame(polygon, width, height) {
            warn!("Skipping wall polygon {} with out-of-frame vertices", idx);
            continue;
        }
        let points = polygon_points(polygon);
        match points.len() {
            0 => {
                debug!("Skipping empty wall polygon {}", idx);
                continue;
            }
            1 => {
                let p = points[0];
                if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
                    filled.set(p.x as u32, p.y as u32, true);
                }
                continue;
            }
            _ => {}
        }
        draw_polygon_mut(filled.as_gray_mut(), &points, Luma([MASK_ON]));
    }

    filled
}

/// Convert to rasteriser points. The rasteriser rejects a closing vertex that
/// repeats the first one, so it is dropped here.
fn polygon_points(polygon: &Polygon) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = polygon.iter().map(|p| Point::new(p[0], p[1])).collect();

    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    points
}

/// Fuse the learned segmentation with the geometric wall estimate.
///
/// A pixel is wall only if the segmentation says so *and* it lies inside one
/// of the wall polygons: `fused = segmentation AND fill(polygons)`. No
/// polygons means no walls.
///
/// # Arguments
/// * `segmentation` - Per-pixel wall mask from the segmentation model
/// * `corners` - Wall-plane polygons from the layout estimator
pub fn fuse_wall_mask(segmentation: &SegmentationMask, corners: &CornerEstimate) -> FusionResult {
    let (width, height) = segmentation.dimensions();
    let polygons = fill_polygons(width, height, corners);

    // Both rasters share the segmentation's dimensions
    let mask = segmentation.and(&polygons).unwrap_or_else(|e| {
        warn!("Wall mask fusion failed: {}", e);
        BinaryMask::new(width, height)
    });
    debug_assert!(mask.is_subset_of(segmentation) && mask.is_subset_of(&polygons));
    if mask.is_blank() && !segmentation.is_blank() {
        warn!("Fused wall mask is empty, textures will not be visible");
    }

    let stats = FusionStats {
        segmentation_pixels: segmentation.count(),
        polygon_pixels: polygons.count(),
        fused_pixels: mask.count(),
    };

    info!(
        "Fused wall mask: {} segmentation px, {} polygon px ({} polygons) -> {} wall px",
        stats.segmentation_pixels,
        stats.polygon_pixels,
        corners.len(),
        stats.fused_pixels
    );

    FusionResult { mask, stats }
}
