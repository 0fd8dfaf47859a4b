//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::room_store::CompositePolicy;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on.
    pub bind_addr: String,
    /// Directory holding the persisted room artifacts.
    pub data_dir: PathBuf,
    /// Directory holding the texture library.
    pub texture_dir: PathBuf,
    /// Uploaded photos taller than this are downscaled.
    pub max_photo_height: u32,
    /// How many times the texture tile is repeated along each axis.
    pub texture_tiles: (u32, u32),
    /// Segmentation service endpoint; unset disables uploads.
    pub segmentation_url: Option<String>,
    /// Layout estimation service endpoint; unset disables uploads.
    pub geometry_url: Option<String>,
    /// Upper bound for segmentation + layout estimation of one upload.
    pub inference_timeout: Duration,
    /// Maximum upload size in MB.
    pub max_upload_mb: usize,
    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
    /// What happens to an existing composite when a new photo is uploaded.
    pub composite_policy: CompositePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let tiles = env_or("TEXTURE_TILES", 6u32).max(1);

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".into()),
            data_dir: std::env::var("ROOM_DATA_DIR")
                .unwrap_or_else(|_| "static/data".into())
                .into(),
            texture_dir: std::env::var("TEXTURE_LIBRARY")
                .unwrap_or_else(|_| "test_images/textures".into())
                .into(),
            max_photo_height: env_or("MAX_PHOTO_HEIGHT", 600u32).max(1),
            texture_tiles: (tiles, tiles),
            segmentation_url: non_empty_var("SEGMENTATION_URL"),
            geometry_url: non_empty_var("GEOMETRY_URL"),
            inference_timeout: Duration::from_secs(env_or("INFERENCE_TIMEOUT_SECS", 120u64)),
            max_upload_mb: env_or("MAX_UPLOAD_MB", 10usize),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| {
                    "http://localhost:9000,http://127.0.0.1:9000,http://localhost:8080,http://127.0.0.1:8080".into()
                })
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            composite_policy: env_or("STALE_COMPOSITE_POLICY", CompositePolicy::Orphan),
        }
    }

    /// Configuration rooted at explicit directories, everything else default.
    pub fn with_dirs(data_dir: impl Into<PathBuf>, texture_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            data_dir: data_dir.into(),
            texture_dir: texture_dir.into(),
            max_photo_height: 600,
            texture_tiles: (6, 6),
            segmentation_url: None,
            geometry_url: None,
            inference_timeout: Duration::from_secs(120),
            max_upload_mb: 10,
            allowed_origins: Vec::new(),
            composite_policy: CompositePolicy::Orphan,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {:?}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
