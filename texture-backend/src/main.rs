use texture_backend::{config::Config, create_app, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    info!("Starting Room Texture Backend Server");

    let config = Config::from_env();
    info!(
        "Room data in {}, textures from {}, composite policy {:?}",
        config.data_dir.display(),
        config.texture_dir.display(),
        config.composite_policy
    );

    let addr = config.bind_addr.clone();
    let state = AppState::from_config(config)?;
    let app = create_app(state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
