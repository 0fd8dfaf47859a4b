use image::{GrayImage, ImageFormat, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub mod layout;
pub mod remote;

pub use layout::polygons_from_layout;
pub use remote::{RemoteGeometryEstimator, RemoteSegmenter};

/// Pixel value used for "set" pixels when a mask is stored as an 8-bit raster
pub const MASK_ON: u8 = 255;

/// Boolean raster stored as 0/255 luma so it can be persisted as a PNG as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    image: GrayImage,
}

/// Per-pixel wall classification produced by a segmentation model
pub type SegmentationMask = BinaryMask;

impl BinaryMask {
    /// All-false mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Any non-zero pixel counts as set; values are normalized to 0/255
    pub fn from_gray(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            if pixel[0] != 0 {
                pixel[0] = MASK_ON;
            }
        }
        Self { image }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let image = GrayImage::from_fn(width, height, |x, y| {
            if f(x, y) {
                Luma([MASK_ON])
            } else {
                Luma([0])
            }
        });
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let v = if value { MASK_ON } else { 0 };
        self.image.put_pixel(x, y, Luma([v]));
    }

    /// Number of set pixels
    pub fn count(&self) -> usize {
        self.image.pixels().filter(|p| p[0] != 0).count()
    }

    /// True when no pixel is set
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p[0] == 0)
    }

    /// Elementwise logical AND. Both masks must have the same dimensions.
    pub fn and(&self, other: &BinaryMask) -> anyhow::Result<BinaryMask> {
        anyhow::ensure!(
            self.dimensions() == other.dimensions(),
            "mask size mismatch: {:?} vs {:?}",
            self.dimensions(),
            other.dimensions()
        );

        let mut out = self.image.clone();
        for (dst, src) in out.pixels_mut().zip(other.image.pixels()) {
            if src[0] == 0 {
                dst[0] = 0;
            }
        }
        Ok(BinaryMask { image: out })
    }

    /// Every set pixel of `self` is also set in `other`
    pub fn is_subset_of(&self, other: &BinaryMask) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .image
                .pixels()
                .zip(other.image.pixels())
                .all(|(a, b)| a[0] == 0 || b[0] != 0)
    }

    pub fn as_gray_mut(&mut self) -> &mut GrayImage {
        &mut self.image
    }

    pub fn to_png_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    pub fn from_png_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(Self::from_gray(img.to_luma8()))
    }
}

/// Polygon vertices in photo pixel space, `[x, y]`
pub type Polygon = Vec<[i32; 2]>;

/// Vertices may lie outside the photo by at most this many times its larger side
const FRAME_MARGIN_FACTOR: i64 = 4;

/// Candidate wall-plane boundaries, in the order the estimator produced them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CornerEstimate {
    pub polygons: Vec<Polygon>,
}

impl CornerEstimate {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Polygon> {
        self.polygons.iter()
    }

    /// First vertex lying implausibly far outside a `width` x `height` photo.
    ///
    /// Wall planes often extend past the frame, so vertices somewhat outside
    /// are normal; coordinates near the integer limits are not.
    pub fn find_out_of_frame(&self, width: u32, height: u32) -> Option<[i32; 2]> {
        self.iter()
            .flatten()
            .copied()
            .find(|&point| !vertex_in_frame(point, width, height))
    }
}

/// Whether every vertex of `polygon` is within the plausible range around a
/// `width` x `height` photo
pub fn polygon_in_frame(polygon: &Polygon, width: u32, height: u32) -> bool {
    polygon
        .iter()
        .all(|&point| vertex_in_frame(point, width, height))
}

fn vertex_in_frame(point: [i32; 2], width: u32, height: u32) -> bool {
    let margin = FRAME_MARGIN_FACTOR * width.max(height).max(1) as i64;
    let (x, y) = (point[0] as i64, point[1] as i64);
    (-margin..=width as i64 + margin).contains(&x) && (-margin..=height as i64 + margin).contains(&y)
}

/// Wall segmentation model - allows for different implementations
pub trait Segmenter: Send + Sync {
    /// Classify each pixel of the photo as wall / not wall
    fn segment(&self, photo: &RgbImage) -> anyhow::Result<SegmentationMask>;

    /// Get model info
    fn model_info(&self) -> String;
}

/// Room layout (wall plane) estimation model
pub trait GeometryEstimator: Send + Sync {
    /// Estimate zero or more wall-plane polygons for the photo
    fn estimate(&self, photo: &RgbImage) -> anyhow::Result<CornerEstimate>;

    /// Get model info
    fn model_info(&self) -> String;
}

/// Placeholder used when no segmentation service is configured
pub struct UnavailableSegmenter {
    reason: String,
}

impl UnavailableSegmenter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Segmenter for UnavailableSegmenter {
    fn segment(&self, _photo: &RgbImage) -> anyhow::Result<SegmentationMask> {
        Err(anyhow::anyhow!(
            "Wall segmentation not available: {}",
            self.reason
        ))
    }

    fn model_info(&self) -> String {
        format!("Unavailable segmenter ({})", self.reason)
    }
}

/// Placeholder used when no layout estimation service is configured
pub struct UnavailableGeometryEstimator {
    reason: String,
}

impl UnavailableGeometryEstimator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl GeometryEstimator for UnavailableGeometryEstimator {
    fn estimate(&self, _photo: &RgbImage) -> anyhow::Result<CornerEstimate> {
        Err(anyhow::anyhow!(
            "Wall geometry estimation not available: {}",
            self.reason
        ))
    }

    fn model_info(&self) -> String {
        format!("Unavailable geometry estimator ({})", self.reason)
    }
}
