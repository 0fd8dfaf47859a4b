use image::{imageops, GenericImageView, RgbImage};
use tracing::info;

use crate::error::Result;

/// Room photo after decoding and height normalization
#[derive(Debug, Clone)]
pub struct NormalizedPhoto {
    pub image: RgbImage,
    /// Dimensions of the decoded upload (width, height)
    pub original_width: u32,
    pub original_height: u32,
}

/// Target size for a photo whose height must not exceed `max_height`.
/// Aspect ratio is preserved; width is never bounded on its own.
pub fn target_dimensions(width: u32, height: u32, max_height: u32) -> (u32, u32) {
    if height <= max_height {
        return (width, height);
    }

    let ratio = max_height as f64 / height as f64;
    let new_width = ((width as f64 * ratio) as u32).max(1);
    (new_width, max_height)
}

/// Decode an uploaded photo and shrink it to `max_height` if it is taller.
///
/// Shrinking uses area averaging (every source pixel contributes to exactly
/// one output pixel), which avoids the aliasing nearest/linear sampling
/// produce on large downscales.
pub fn normalize_room_photo(bytes: &[u8], max_height: u32) -> Result<NormalizedPhoto> {
    let img = image::load_from_memory(bytes)?;
    let (original_width, original_height) = img.dimensions();

    let (width, height) = target_dimensions(original_width, original_height, max_height);
    let rgb = img.to_rgb8();

    let image = if (width, height) == (original_width, original_height) {
        rgb
    } else {
        info!(
            "Downscaling room photo {}x{} -> {}x{}",
            original_width, original_height, width, height
        );
        imageops::thumbnail(&rgb, width, height)
    };

    Ok(NormalizedPhoto {
        image,
        original_width,
        original_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    #[test]
    fn test_tall_photo_is_downscaled_preserving_aspect() {
        // 800 wide, 1200 tall -> 400 x 600
        let bytes = encode(RgbImage::from_pixel(800, 1200, Rgb([90, 120, 200])), ImageFormat::Png);

        let normalized = normalize_room_photo(&bytes, 600).unwrap();

        assert_eq!(normalized.image.dimensions(), (400, 600));
        assert_eq!((normalized.original_width, normalized.original_height), (800, 1200));
    }

    #[test]
    fn test_short_photo_is_untouched() {
        let bytes = encode(RgbImage::from_pixel(1600, 600, Rgb([1, 2, 3])), ImageFormat::Png);

        let normalized = normalize_room_photo(&bytes, 600).unwrap();

        // Width is not bounded on its own
        assert_eq!(normalized.image.dimensions(), (1600, 600));
        assert_eq!((normalized.original_width, normalized.original_height), (1600, 600));
    }

    #[test]
    fn test_area_averaging_keeps_flat_colour() {
        let bytes = encode(RgbImage::from_pixel(400, 1200, Rgb([40, 80, 160])), ImageFormat::Png);

        let normalized = normalize_room_photo(&bytes, 600).unwrap();

        assert_eq!(normalized.image.dimensions(), (200, 600));
        assert!(normalized.image.pixels().all(|p| *p == Rgb([40, 80, 160])));
    }

    #[test]
    fn test_jpeg_input_is_accepted() {
        let bytes = encode(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])), ImageFormat::Jpeg);
        let normalized = normalize_room_photo(&bytes, 600).unwrap();
        assert_eq!(normalized.image.dimensions(), (64, 64));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let result = normalize_room_photo(b"definitely not an image", 600);
        assert!(matches!(result, Err(crate::error::RoomError::Decode(_))));
    }

    #[test]
    fn test_target_dimensions_never_collapse_width() {
        assert_eq!(target_dimensions(1, 5000, 600), (1, 600));
        assert_eq!(target_dimensions(900, 601, 600), (898, 600));
    }
}
