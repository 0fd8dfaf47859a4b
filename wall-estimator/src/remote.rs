//! HTTP clients for segmentation / layout inference services.
//!
//! Both services receive the photo as a base64 PNG and answer with JSON.
//! The estimator traits are synchronous: callers run them on tokio's blocking
//! pool, and each request is driven to completion on the ambient runtime.

use crate::{BinaryMask, CornerEstimate, GeometryEstimator, Polygon, SegmentationMask, Segmenter};
use base64::{engine::general_purpose, Engine as _};
use image::{ImageFormat, RgbImage};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct InferenceRequest {
    /// Base64 encoded PNG
    image: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct SegmentationReply {
    /// Base64 encoded PNG, non-zero = wall
    mask: String,
}

/// Layout service reply: either explicit polygons or a per-pixel label map
#[derive(Debug, Deserialize)]
pub struct GeometryReply {
    #[serde(default)]
    pub polygons: Option<Vec<Polygon>>,
    /// Base64 encoded 8-bit PNG of plane labels
    #[serde(default)]
    pub layout: Option<String>,
    /// Labels in `layout` that are walls
    #[serde(default)]
    pub wall_labels: Vec<u8>,
}

impl GeometryReply {
    pub fn into_corners(self) -> anyhow::Result<CornerEstimate> {
        if let Some(polygons) = self.polygons {
            return Ok(CornerEstimate::new(polygons));
        }

        match self.layout {
            Some(layout_b64) => {
                let bytes = general_purpose::STANDARD.decode(layout_b64)?;
                let layout = image::load_from_memory(&bytes)?.to_luma8();
                Ok(crate::polygons_from_layout(&layout, &self.wall_labels))
            }
            None => Err(anyhow::anyhow!(
                "Layout reply contains neither polygons nor a layout map"
            )),
        }
    }
}

fn encode_request(photo: &RgbImage) -> anyhow::Result<InferenceRequest> {
    let mut png_bytes = Vec::new();
    photo.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;

    Ok(InferenceRequest {
        image: general_purpose::STANDARD.encode(&png_bytes),
        width: photo.width(),
        height: photo.height(),
    })
}

fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

async fn post_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    request: &InferenceRequest,
) -> anyhow::Result<T> {
    let response = client.post(url).json(request).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        warn!("Inference service error: {} - {}", status, error_text);
        return Err(anyhow::anyhow!(
            "Inference service error: {} - {}",
            status,
            error_text
        ));
    }

    Ok(response.json().await?)
}

/// Drive an inference request from a blocking worker thread.
///
/// Must not be called from inside an async task; the backend calls the
/// estimators from `spawn_blocking`.
fn block_on_runtime<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let handle = Handle::try_current()
        .map_err(|e| anyhow::anyhow!("Remote inference needs a tokio runtime: {}", e))?;
    Ok(handle.block_on(future))
}

/// Wall segmentation served by a remote model
pub struct RemoteSegmenter {
    client: Client,
    url: String,
}

impl RemoteSegmenter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }
}

impl Segmenter for RemoteSegmenter {
    fn segment(&self, photo: &RgbImage) -> anyhow::Result<SegmentationMask> {
        info!(
            "Requesting wall segmentation for {}x{} photo from {}",
            photo.width(),
            photo.height(),
            self.url
        );

        let request = encode_request(photo)?;
        let reply: SegmentationReply =
            block_on_runtime(post_json(&self.client, &self.url, &request))??;

        let bytes = general_purpose::STANDARD.decode(reply.mask)?;
        let mask = BinaryMask::from_gray(image::load_from_memory(&bytes)?.to_luma8());

        info!("Segmentation returned {} wall pixels", mask.count());
        Ok(mask)
    }

    fn model_info(&self) -> String {
        format!("Remote segmenter ({})", self.url)
    }
}

/// Wall layout estimation served by a remote model
pub struct RemoteGeometryEstimator {
    client: Client,
    url: String,
}

impl RemoteGeometryEstimator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }
}

impl GeometryEstimator for RemoteGeometryEstimator {
    fn estimate(&self, photo: &RgbImage) -> anyhow::Result<CornerEstimate> {
        info!(
            "Requesting wall layout for {}x{} photo from {}",
            photo.width(),
            photo.height(),
            self.url
        );

        let request = encode_request(photo)?;
        let reply: GeometryReply =
            block_on_runtime(post_json(&self.client, &self.url, &request))??;
        let corners = reply.into_corners()?;

        info!("Layout estimation returned {} wall polygons", corners.len());
        Ok(corners)
    }

    fn model_info(&self) -> String {
        format!("Remote geometry estimator ({})", self.url)
    }
}
