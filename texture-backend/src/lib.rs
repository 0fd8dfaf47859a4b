use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use wall_estimator::{
    GeometryEstimator, RemoteGeometryEstimator, RemoteSegmenter, Segmenter,
    UnavailableGeometryEstimator, UnavailableSegmenter,
};

pub mod config;
pub mod display;
pub mod error;
pub mod image_preprocessor;
pub mod mask_fusion;
pub mod room_store;
pub mod routes;
pub mod texture_library;
pub mod texture_mapping;
pub mod texture_orchestrator;
pub mod upload_orchestrator;

use config::Config;
use room_store::RoomStore;
use texture_library::TextureLibrary;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<RoomStore>,
    pub textures: Arc<TextureLibrary>,
    pub segmenter: Arc<dyn Segmenter>,
    pub geometry: Arc<dyn GeometryEstimator>,
}

impl AppState {
    pub fn new(
        config: Config,
        segmenter: Arc<dyn Segmenter>,
        geometry: Arc<dyn GeometryEstimator>,
    ) -> error::Result<Self> {
        let store = RoomStore::open(&config.data_dir)?;
        let textures = TextureLibrary::new(&config.texture_dir);

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            textures: Arc::new(textures),
            segmenter,
            geometry,
        })
    }

    /// State with remote estimators for every configured service URL
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let segmenter: Arc<dyn Segmenter> = match &config.segmentation_url {
            Some(url) => Arc::new(RemoteSegmenter::new(url, config.inference_timeout)?),
            None => {
                warn!("SEGMENTATION_URL not set, uploads will fail");
                Arc::new(UnavailableSegmenter::new("SEGMENTATION_URL not set"))
            }
        };
        let geometry: Arc<dyn GeometryEstimator> = match &config.geometry_url {
            Some(url) => Arc::new(RemoteGeometryEstimator::new(url, config.inference_timeout)?),
            None => {
                warn!("GEOMETRY_URL not set, uploads will fail");
                Arc::new(UnavailableGeometryEstimator::new("GEOMETRY_URL not set"))
            }
        };

        info!("Segmenter: {}", segmenter.model_info());
        info!("Geometry estimator: {}", geometry.model_info());

        Ok(Self::new(config, segmenter, geometry)?)
    }
}

pub fn create_app(state: AppState) -> Router {
    let origins: Vec<_> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    // Multipart framing needs a little room on top of the file itself
    let body_limit = state.config.max_upload_mb * 1024 * 1024 + 64 * 1024;

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health_check))
        .route("/prediction", post(routes::upload_room_handler))
        .route("/room", get(routes::room_view_handler))
        .route("/room/photo", get(routes::room_photo_handler))
        .route("/room/composite", get(routes::room_composite_handler))
        .route("/result_textured", post(routes::apply_texture_handler))
        .nest_service("/textures", ServeDir::new(&state.config.texture_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
