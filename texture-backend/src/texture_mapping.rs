//! Perspective texture mapping and brightness transfer onto wall regions.

use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::path::Path;
use tracing::{debug, info, warn};
use wall_estimator::{BinaryMask, CornerEstimate, Polygon};

use crate::error::{Result, RoomError};

/// Largest swatch side produced by `load_texture`
pub const MAX_SWATCH_SIDE: u32 = 4096;

/// Load a texture tile and repeat it `tiles_x` x `tiles_y` times.
///
/// The tile is shrunk first if the repeated swatch would exceed
/// `MAX_SWATCH_SIDE` on either side.
pub fn load_texture(path: &Path, tiles_x: u32, tiles_y: u32) -> Result<RgbaImage> {
    let tile = image::open(path)
        .map_err(|e| RoomError::Texture(format!("{}: {}", path.display(), e)))?
        .to_rgba8();

    Ok(tile_texture(&tile, tiles_x, tiles_y))
}

/// Repeat `tile` into a `tiles_x` x `tiles_y` swatch
pub fn tile_texture(tile: &RgbaImage, tiles_x: u32, tiles_y: u32) -> RgbaImage {
    let tiles_x = tiles_x.max(1);
    let tiles_y = tiles_y.max(1);

    let (tile_w, tile_h) = tile.dimensions();
    let max_w = (MAX_SWATCH_SIDE / tiles_x).max(1);
    let max_h = (MAX_SWATCH_SIDE / tiles_y).max(1);

    let shrunk;
    let tile = if tile_w > max_w || tile_h > max_h {
        let scale = (max_w as f64 / tile_w as f64).min(max_h as f64 / tile_h as f64);
        let w = ((tile_w as f64 * scale) as u32).clamp(1, max_w);
        let h = ((tile_h as f64 * scale) as u32).clamp(1, max_h);
        debug!("Shrinking texture tile {}x{} -> {}x{}", tile_w, tile_h, w, h);
        shrunk = imageops::thumbnail(tile, w, h);
        &shrunk
    } else {
        tile
    };

    let (w, h) = tile.dimensions();
    let mut swatch = RgbaImage::new(w * tiles_x, h * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            imageops::replace(&mut swatch, tile, (tx * w) as i64, (ty * h) as i64);
        }
    }
    swatch
}

/// Warp the texture onto every wall polygon of the photo.
///
/// Each polygon gets its own perspective projection: the texture's corners
/// map to the polygon's four vertices in order, or to its bounding box when
/// the polygon does not have exactly four vertices. Warped pixels are only
/// written where the wall mask is set.
pub fn map_texture(
    texture: &RgbaImage,
    photo: &RgbImage,
    corners: &CornerEstimate,
    mask: &BinaryMask,
) -> RgbImage {
    let (width, height) = photo.dimensions();
    let mut textured = photo.clone();
    if texture.width() == 0 || texture.height() == 0 || mask.dimensions() != (width, height) {
        warn!(
            "Skipping texture mapping: texture {:?}, mask {:?}, photo {:?}",
            texture.dimensions(),
            mask.dimensions(),
            photo.dimensions()
        );
        return textured;
    }

    let source = [
        (0.0, 0.0),
        (texture.width() as f32, 0.0),
        (texture.width() as f32, texture.height() as f32),
        (0.0, texture.height() as f32),
    ];

    let mut warped = RgbaImage::new(width, height);
    for (idx, polygon) in corners.iter().enumerate() {
        let Some(target) = target_quad(polygon) else {
            debug!("Wall polygon {} has no area, skipping", idx);
            continue;
        };
        let projection = match Projection::from_control_points(source, target)
            .or_else(|| bounding_quad(polygon).and_then(|b| Projection::from_control_points(source, b)))
        {
            Some(projection) => projection,
            None => {
                debug!("No projection for wall polygon {}, skipping", idx);
                continue;
            }
        };

        warp_into(
            texture,
            &projection,
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
            &mut warped,
        );

        for (x, y, dst) in textured.enumerate_pixels_mut() {
            if !mask.get(x, y) {
                continue;
            }
            let src = warped.get_pixel(x, y);
            if src[3] > 0 {
                *dst = blend(src, dst);
            }
        }
    }

    info!(
        "Mapped {}x{} texture onto {} wall polygons",
        texture.width(),
        texture.height(),
        corners.len()
    );
    textured
}

fn blend(src: &Rgba<u8>, dst: &Rgb<u8>) -> Rgb<u8> {
    let alpha = src[3] as u32;
    let mix = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * (255 - alpha) + 127) / 255) as u8;
    Rgb([mix(src[0], dst[0]), mix(src[1], dst[1]), mix(src[2], dst[2])])
}

fn target_quad(polygon: &Polygon) -> Option<[(f32, f32); 4]> {
    if polygon.len() == 4 {
        let mut quad = [(0.0, 0.0); 4];
        for (slot, p) in quad.iter_mut().zip(polygon.iter()) {
            *slot = (p[0] as f32, p[1] as f32);
        }
        Some(quad)
    } else {
        bounding_quad(polygon)
    }
}

/// Corners of the polygon's bounding box, clockwise from top-left
fn bounding_quad(polygon: &Polygon) -> Option<[(f32, f32); 4]> {
    let min_x = polygon.iter().map(|p| p[0]).min()?;
    let max_x = polygon.iter().map(|p| p[0]).max()?;
    let min_y = polygon.iter().map(|p| p[1]).min()?;
    let max_y = polygon.iter().map(|p| p[1]).max()?;
    if min_x == max_x || min_y == max_y {
        return None;
    }

    let (x0, x1, y0, y1) = (min_x as f32, max_x as f32, min_y as f32, max_y as f32);
    Some([(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
}

fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// Carry the photo's shading over to the textured walls.
///
/// Inside the mask each textured pixel is scaled by the photo's luminance at
/// that pixel over the mean luminance of the masked region. Outside the mask
/// the output equals the photo.
pub fn brightness_transfer(photo: &RgbImage, textured: &RgbImage, mask: &BinaryMask) -> RgbImage {
    let mut output = photo.clone();
    if textured.dimensions() != photo.dimensions() || mask.dimensions() != photo.dimensions() {
        warn!(
            "Skipping brightness transfer: photo {:?}, textured {:?}, mask {:?}",
            photo.dimensions(),
            textured.dimensions(),
            mask.dimensions()
        );
        return output;
    }

    let (sum, count) = photo
        .enumerate_pixels()
        .filter(|(x, y, _)| mask.get(*x, *y))
        .fold((0.0f64, 0u64), |(sum, count), (_, _, p)| {
            (sum + luminance(p) as f64, count + 1)
        });
    if count == 0 {
        return output;
    }
    let mean = (sum / count as f64) as f32;

    for (x, y, dst) in output.enumerate_pixels_mut() {
        if !mask.get(x, y) {
            continue;
        }
        let gain = if mean > 0.0 {
            luminance(photo.get_pixel(x, y)) / mean
        } else {
            1.0
        };
        let src = textured.get_pixel(x, y);
        *dst = Rgb([
            (src[0] as f32 * gain).round().clamp(0.0, 255.0) as u8,
            (src[1] as f32 * gain).round().clamp(0.0, 255.0) as u8,
            (src[2] as f32 * gain).round().clamp(0.0, 255.0) as u8,
        ]);
    }

    debug!("Brightness transfer over {} px, mean luminance {:.1}", count, mean);
    output
}
